// id.rs — Stable identifiers for AST nodes and declarations
//
// Every statement, expression and global initializer carries an `AstId`;
// every declaration carries a `DeclId`. The CFG keys its statement nodes on
// `AstId`, so the same AST node reached from two paths maps onto one graph
// node. Ids are allocated in construction order, which keeps graph output
// deterministic.

use serde::{Deserialize, Serialize};

/// Stable identity of a statement or expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AstId(pub u32);

/// Stable identity of a declaration (global, local, parameter, function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclId(pub u32);

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_ast: u32,
    next_decl: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_ast(&mut self) -> AstId {
        let id = AstId(self.next_ast);
        self.next_ast += 1;
        id
    }

    pub fn alloc_decl(&mut self) -> DeclId {
        let id = DeclId(self.next_decl);
        self.next_decl += 1;
        id
    }
}
