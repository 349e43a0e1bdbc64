// cfg.rs — Control-flow graph construction over statement trees
//
// Lowers a module body or a function body into a directed graph whose nodes
// are AST statements/expressions plus synthetic `Start`/`End`/`Flow` meta
// nodes. Statements after a `return`/`throw`/`break`/`continue` are still
// lowered, as a detached chain that joins the live chain through a `Flow`
// node. Paths the drawn shape leaves out (`if` fall-through, `break`,
// `continue`, exceptions into catches, exits to `End`) are recorded as
// implicit flows for dataflow.
//
// Preconditions: `module` is well formed (ids unique, names resolved where
//                possible).
// Postconditions: `Start` has no in-edges, `End` has no out-edges, no two
//                 edges share the same endpoints, and each AST node maps to
//                 at most one graph node.
// Failure modes: none (unknown shapes lower conservatively).
// Side effects: none.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::ast::*;
use crate::dataflow::Transfer;
use crate::id::{AstId, DeclId};

// ── Public types ────────────────────────────────────────────────────────────

/// Index of a node within one `Cfg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgNodeId(pub u32);

/// Edge identifier; equals the edge's insertion position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    Start,
    End,
    Flow,
}

/// What a graph node stands for.
#[derive(Debug, Clone, Copy)]
pub enum NodeData<'a> {
    /// Synthetic node; `counter` orders meta nodes within one graph.
    Meta { kind: MetaKind, counter: u32 },
    Stmt(&'a Stmt),
    /// A control expression: loop/branch condition or `for` sequence.
    Expr(&'a Expr),
    Global(&'a GlobalVar),
    LoopVar(&'a LoopVar),
}

/// Identity used for deduplication and deterministic ordering: meta nodes
/// first by counter, then AST nodes by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Meta(u32),
    Ast(AstId),
}

impl<'a> NodeData<'a> {
    pub fn key(&self) -> NodeKey {
        match self {
            NodeData::Meta { counter, .. } => NodeKey::Meta(*counter),
            NodeData::Stmt(s) => NodeKey::Ast(s.id),
            NodeData::Expr(e) => NodeKey::Ast(e.id),
            NodeData::Global(g) => NodeKey::Ast(g.id),
            NodeData::LoopVar(v) => NodeKey::Ast(v.id),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, NodeData::Meta { .. })
    }

    pub fn meta_kind(&self) -> Option<MetaKind> {
        match self {
            NodeData::Meta { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The declaration this node introduces, if it is a declaration site.
    pub fn declared(&self) -> Option<DeclId> {
        match self {
            NodeData::Stmt(Stmt {
                kind: StmtKind::Declaration(local),
                ..
            }) => Some(local.decl),
            NodeData::Global(g) => Some(g.decl),
            NodeData::LoopVar(v) => Some(v.decl),
            _ => None,
        }
    }
}

impl fmt::Display for NodeData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeData::Meta { kind, .. } => match kind {
                MetaKind::Start => write!(f, "<start>"),
                MetaKind::End => write!(f, "<end>"),
                MetaKind::Flow => write!(f, "<flow>"),
            },
            NodeData::Stmt(s) => write!(f, "{s}"),
            NodeData::Expr(e) => write!(f, "{e}"),
            NodeData::Global(g) => write!(f, "{g}"),
            NodeData::LoopVar(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfgNode<'a> {
    pub id: CfgNodeId,
    pub data: NodeData<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub from: CfgNodeId,
    pub to: CfgNodeId,
}

/// Where control leaves a lowered fragment.
///
/// `node` is the drawn exit. `implicit` lists further points that continue
/// at whatever comes next without a drawn edge: the false side of an `if`
/// without `else` and the `break`s of a loop. Dataflow follows both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exit {
    pub node: Option<CfgNodeId>,
    pub implicit: Vec<CfgNodeId>,
}

impl Exit {
    pub fn at(node: CfgNodeId) -> Self {
        Exit {
            node: Some(node),
            implicit: Vec::new(),
        }
    }

    pub fn points(&self) -> impl Iterator<Item = CfgNodeId> + '_ {
        self.node.into_iter().chain(self.implicit.iter().copied())
    }
}

impl From<Option<CfgNodeId>> for Exit {
    fn from(node: Option<CfgNodeId>) -> Self {
        Exit {
            node,
            implicit: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct LoopFrame {
    head: CfgNodeId,
    breaks: Vec<CfgNodeId>,
}

/// Control-flow graph of one body, borrowing the AST it was built from.
#[derive(Debug)]
pub struct Cfg<'a> {
    module: &'a Module,
    decls: HashMap<DeclId, &'a Decl>,
    nodes: Vec<CfgNode<'a>>,
    index: HashMap<NodeKey, CfgNodeId>,
    edges: Vec<Edge>,
    edge_set: HashSet<(CfgNodeId, CfgNodeId)>,
    /// Flows dataflow must follow that are not drawn as edges.
    implicit: Vec<(CfgNodeId, CfgNodeId)>,
    implicit_set: HashSet<(CfgNodeId, CfgNodeId)>,
    decl_sites: HashMap<DeclId, CfgNodeId>,
    /// Loop or branch statement owning a condition, sequence or loop
    /// variable node.
    owners: HashMap<AstId, &'a Stmt>,
    loops: Vec<LoopFrame>,
    /// Points where `return` or `throw` leave the body.
    exits: Vec<CfgNodeId>,
    meta_counter: u32,
    includes_globals: bool,
    start: CfgNodeId,
    end: CfgNodeId,
    /// Per-node transfer functions, parallel to `nodes`; empty until the
    /// dataflow analysis has run.
    pub(crate) transfers: Vec<Transfer>,
}

// ── Construction ────────────────────────────────────────────────────────────

impl<'a> Cfg<'a> {
    /// Graph for the module's top-level code: globals in declaration order,
    /// then the module body.
    pub fn for_module(module: &'a Module) -> Self {
        let mut cfg = Cfg::empty(module, true);
        let mut parent = Exit::at(cfg.start);
        for global in &module.globals {
            let node = cfg.get_or_add_node(NodeData::Global(global));
            cfg.connect(&parent, node);
            parent = Exit::at(node);
        }
        let last = cfg.add_block(parent, &module.body.stmts);
        cfg.finish(last);
        cfg
    }

    /// Graph for one function body. Globals are not part of the graph.
    pub fn for_function(module: &'a Module, function: &'a Function) -> Self {
        Cfg::for_block(module, &function.body)
    }

    /// Graph for a bare statement sequence.
    pub fn for_block(module: &'a Module, block: &'a Block) -> Self {
        let mut cfg = Cfg::empty(module, false);
        let last = cfg.add_block(Exit::at(cfg.start), &block.stmts);
        cfg.finish(last);
        cfg
    }

    fn empty(module: &'a Module, includes_globals: bool) -> Self {
        let mut cfg = Cfg {
            module,
            decls: module.decls.iter().map(|d| (d.id, d)).collect(),
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            edge_set: HashSet::new(),
            implicit: Vec::new(),
            implicit_set: HashSet::new(),
            decl_sites: HashMap::new(),
            owners: HashMap::new(),
            loops: Vec::new(),
            exits: Vec::new(),
            meta_counter: 0,
            includes_globals,
            start: CfgNodeId(0),
            end: CfgNodeId(0),
            transfers: Vec::new(),
        };
        cfg.start = cfg.add_meta(MetaKind::Start);
        cfg.end = cfg.add_meta(MetaKind::End);
        cfg
    }

    fn finish(&mut self, last: Exit) {
        let end = self.end;
        self.connect(&last, end);
        for exit in std::mem::take(&mut self.exits) {
            self.add_implicit(exit, end);
        }
        debug!(
            target: "cfg",
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            implicit = self.implicit.len(),
            "built control-flow graph"
        );
    }

    fn add_meta(&mut self, kind: MetaKind) -> CfgNodeId {
        let counter = self.meta_counter;
        self.meta_counter += 1;
        self.get_or_add_node(NodeData::Meta { kind, counter })
    }

    /// Look a node up by identity, inserting it on first sight.
    pub fn get_or_add_node(&mut self, data: NodeData<'a>) -> CfgNodeId {
        let key = data.key();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = CfgNodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode { id, data });
        self.index.insert(key, id);
        if let Some(decl) = data.declared() {
            self.decl_sites.insert(decl, id);
        }
        id
    }

    /// Add `from -> to`. A missing endpoint or an existing pair is a no-op.
    pub fn add_edge(&mut self, from: Option<CfgNodeId>, to: Option<CfgNodeId>) -> Option<EdgeId> {
        let (from, to) = (from?, to?);
        if !self.edge_set.insert((from, to)) {
            return None;
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { id, from, to });
        Some(id)
    }

    fn add_implicit(&mut self, from: CfgNodeId, to: CfgNodeId) {
        if self.edge_set.contains(&(from, to)) || !self.implicit_set.insert((from, to)) {
            return;
        }
        self.implicit.push((from, to));
    }

    /// Continue `exit` at `to`: a drawn edge from its node, implicit flows
    /// from everything else.
    fn connect(&mut self, exit: &Exit, to: CfgNodeId) {
        self.add_edge(exit.node, Some(to));
        for point in &exit.implicit {
            self.add_implicit(*point, to);
        }
    }

    /// Chain `stmts` after `parent`; returns where control leaves them.
    ///
    /// Statements up to and including the first control transfer form the
    /// live chain. The rest is lowered without a predecessor and merged back
    /// through a `Flow` node.
    pub fn add_block(&mut self, mut parent: Exit, stmts: &'a [Stmt]) -> Exit {
        let split = stmts
            .iter()
            .position(Stmt::transfers_control)
            .map_or(stmts.len(), |i| i + 1);
        let (live, dead) = stmts.split_at(split);

        for stmt in live {
            parent = self.add_stmt(parent, stmt);
        }

        if !dead.is_empty() {
            let dead_end = self.add_block(Exit::default(), dead);
            let flow = self.add_meta(MetaKind::Flow);
            self.connect(&parent, flow);
            self.connect(&dead_end, flow);
            parent = Exit::at(flow);
        }

        parent
    }

    fn add_stmt(&mut self, parent: Exit, stmt: &'a Stmt) -> Exit {
        match &stmt.kind {
            StmtKind::Block(block) => self.add_block(parent, &block.stmts),
            StmtKind::While {
                cond,
                body,
                else_body,
            } => self.add_while(parent, stmt, cond, body, else_body.as_ref()),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => self.add_if(parent, stmt, cond, then_body, else_body.as_ref()),
            StmtKind::For { var, seq, body } => self.add_for(parent, stmt, var, seq, body),
            StmtKind::Try { body, catches } => self.add_try_catch(parent, body, catches),
            // Value-less exits draw nothing; they only end the live chain.
            StmtKind::Return(None) | StmtKind::Throw(None) => {
                self.exits.extend(parent.points());
                parent
            }
            StmtKind::Break => {
                if let Some(frame) = self.loops.last_mut() {
                    frame.breaks.extend(parent.points());
                }
                parent
            }
            StmtKind::Continue => {
                if let Some(head) = self.loops.last().map(|frame| frame.head) {
                    for point in parent.points() {
                        self.add_implicit(point, head);
                    }
                }
                parent
            }
            StmtKind::Return(Some(_)) | StmtKind::Throw(Some(_)) => {
                let node = self.get_or_add_node(NodeData::Stmt(stmt));
                self.connect(&parent, node);
                self.exits.push(node);
                Exit::at(node)
            }
            StmtKind::Expr(_)
            | StmtKind::Declaration(_)
            | StmtKind::Assert(_)
            | StmtKind::Yield
            | StmtKind::Comment(_)
            | StmtKind::SetLocation(_) => {
                let node = self.get_or_add_node(NodeData::Stmt(stmt));
                self.connect(&parent, node);
                Exit::at(node)
            }
        }
    }

    fn add_while(
        &mut self,
        parent: Exit,
        stmt: &'a Stmt,
        cond: &'a Expr,
        body: &'a Block,
        else_body: Option<&'a Block>,
    ) -> Exit {
        let head = self.get_or_add_node(NodeData::Expr(cond));
        self.owners.insert(cond.id, stmt);
        self.connect(&parent, head);

        self.loops.push(LoopFrame {
            head,
            breaks: Vec::new(),
        });
        let body_end = self.add_block(Exit::at(head), &body.stmts);
        self.connect(&body_end, head);
        let breaks = self.loops.pop().map(|frame| frame.breaks).unwrap_or_default();

        match else_body {
            Some(else_body) => {
                let else_end = self.add_block(Exit::at(head), &else_body.stmts);
                let flow = self.add_meta(MetaKind::Flow);
                self.connect(&else_end, flow);
                self.add_edge(Some(head), Some(flow));
                Exit {
                    node: Some(flow),
                    implicit: breaks,
                }
            }
            None => Exit {
                node: Some(head),
                implicit: breaks,
            },
        }
    }

    /// Without `else`, the false side is an implicit flow from the condition
    /// to whatever follows the `if`.
    fn add_if(
        &mut self,
        parent: Exit,
        stmt: &'a Stmt,
        cond: &'a Expr,
        then_body: &'a Block,
        else_body: Option<&'a Block>,
    ) -> Exit {
        let cond_node = self.get_or_add_node(NodeData::Expr(cond));
        self.owners.insert(cond.id, stmt);
        self.connect(&parent, cond_node);

        let mut true_end = self.add_block(Exit::at(cond_node), &then_body.stmts);

        match else_body {
            Some(else_body) => {
                let false_end = self.add_block(Exit::at(cond_node), &else_body.stmts);
                let flow = self.add_meta(MetaKind::Flow);
                self.connect(&false_end, flow);
                self.connect(&true_end, flow);
                Exit::at(flow)
            }
            None => {
                true_end.implicit.push(cond_node);
                true_end
            }
        }
    }

    fn add_for(
        &mut self,
        parent: Exit,
        stmt: &'a Stmt,
        var: &'a LoopVar,
        seq: &'a Expr,
        body: &'a Block,
    ) -> Exit {
        let head = self.get_or_add_node(NodeData::Expr(seq));
        self.owners.insert(seq.id, stmt);
        self.connect(&parent, head);

        let var_node = self.get_or_add_node(NodeData::LoopVar(var));
        self.owners.insert(var.id, stmt);
        self.add_edge(Some(head), Some(var_node));

        self.loops.push(LoopFrame {
            head,
            breaks: Vec::new(),
        });
        let body_end = self.add_block(Exit::at(var_node), &body.stmts);
        self.connect(&body_end, head);
        let breaks = self.loops.pop().map(|frame| frame.breaks).unwrap_or_default();

        Exit {
            node: Some(head),
            implicit: breaks,
        }
    }

    fn add_try_catch(&mut self, parent: Exit, body: &'a Block, catches: &'a [Catch]) -> Exit {
        let first = self.nodes.len();
        let body_end = self.add_block(parent.clone(), &body.stmts);
        let throwing: Vec<CfgNodeId> = (first..self.nodes.len())
            .map(|i| CfgNodeId(i as u32))
            .filter(|id| !self.node(*id).data.is_meta())
            .collect();

        let flow = self.add_meta(MetaKind::Flow);
        self.connect(&body_end, flow);

        // A catch is entered from where the try started or from any point
        // of its body that may throw.
        let mut handler = parent;
        handler.implicit.extend(throwing);
        for catch in catches {
            let catch_end = self.add_block(handler.clone(), &catch.body.stmts);
            self.connect(&catch_end, flow);
        }

        Exit::at(flow)
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl<'a> Cfg<'a> {
    pub fn module(&self) -> &'a Module {
        self.module
    }

    pub fn start(&self) -> CfgNodeId {
        self.start
    }

    pub fn end(&self) -> CfgNodeId {
        self.end
    }

    pub fn nodes(&self) -> &[CfgNode<'a>] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Flows that are possible at run time but not drawn: `if` fall-through,
    /// `break`/`continue`, exceptions into catches, and exits to `End`.
    pub fn implicit_flows(&self) -> &[(CfgNodeId, CfgNodeId)] {
        &self.implicit
    }

    /// Predecessors of every node as seen by dataflow, indexed by node.
    pub fn flow_predecessors(&self) -> Vec<Vec<CfgNodeId>> {
        let mut preds = vec![Vec::new(); self.nodes.len()];
        for e in &self.edges {
            preds[e.to.0 as usize].push(e.from);
        }
        for (from, to) in &self.implicit {
            preds[to.0 as usize].push(*from);
        }
        preds
    }

    pub fn node(&self, id: CfgNodeId) -> &CfgNode<'a> {
        &self.nodes[id.0 as usize]
    }

    /// Graph node of an AST statement or expression, if it was lowered.
    pub fn find_node(&self, ast: AstId) -> Option<CfgNodeId> {
        self.index.get(&NodeKey::Ast(ast)).copied()
    }

    pub fn in_edges(&self, id: CfgNodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn out_edges(&self, id: CfgNodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Node ids in deterministic output order.
    pub fn sorted_nodes(&self) -> Vec<CfgNodeId> {
        let mut ids: Vec<CfgNodeId> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort_by_key(|id| self.node(*id).data.key());
        ids
    }

    pub fn decl(&self, id: DeclId) -> Option<&'a Decl> {
        self.decls.get(&id).copied()
    }

    /// Node that declares `decl` in this graph.
    pub fn decl_site(&self, decl: DeclId) -> Option<CfgNodeId> {
        self.decl_sites.get(&decl).copied()
    }

    /// Whether `decl` is expected to have a declaring node in this graph.
    pub(crate) fn declares_here(&self, decl: &Decl) -> bool {
        match decl.kind {
            DeclKind::LocalVariable => true,
            DeclKind::GlobalVariable => self.includes_globals,
            DeclKind::Parameter { .. } | DeclKind::Function { .. } => false,
        }
    }

    /// Non-meta nodes without any incoming edge.
    pub fn unreachable_nodes(&self) -> Vec<CfgNodeId> {
        let targets: HashSet<CfgNodeId> = self.edges.iter().map(|e| e.to).collect();
        self.sorted_nodes()
            .into_iter()
            .filter(|id| !self.node(*id).data.is_meta() && !targets.contains(id))
            .collect()
    }

    /// Non-meta nodes that no drawn path from `Start` reaches, including
    /// dead loops whose nodes only reach each other.
    pub fn dead_nodes(&self) -> Vec<CfgNodeId> {
        let mut live = HashSet::from([self.start]);
        let mut queue = VecDeque::from([self.start]);
        while let Some(n) = queue.pop_front() {
            for e in self.out_edges(n) {
                if live.insert(e.to) {
                    queue.push_back(e.to);
                }
            }
        }
        self.sorted_nodes()
            .into_iter()
            .filter(|id| !self.node(*id).data.is_meta() && !live.contains(id))
            .collect()
    }

    /// Statement a node stands for: the node's own statement, or the loop or
    /// branch that owns a condition, sequence or loop variable.
    pub fn owner(&self, id: CfgNodeId) -> Option<&'a Stmt> {
        match self.node(id).data {
            NodeData::Stmt(stmt) => Some(stmt),
            NodeData::Expr(e) => self.owners.get(&e.id).copied(),
            NodeData::LoopVar(var) => self.owners.get(&var.id).copied(),
            NodeData::Meta { .. } | NodeData::Global(_) => None,
        }
    }

    /// Hex SHA-256 of the DOT rendering.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(crate::dot::emit_dot(self).as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}
