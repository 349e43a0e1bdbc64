// ast.rs — Statement/expression trees consumed by the CFG builder
//
// A closed set of node kinds: exactly the shapes control-flow construction
// and dataflow classification need, plus `Operator` as the catch-all for
// every other expression. Front-ends hand these trees over either by
// building them directly (see `builder.rs`) or as JSON.
//
// Preconditions: ids are unique within a module (the builder guarantees it).
// Postconditions: none (data-only module).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{AstId, DeclId};

// ── Declarations ────────────────────────────────────────────────────────────

/// Passing convention of a formal function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Unknown,
    Copy,
    In,
    InOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    GlobalVariable,
    LocalVariable,
    Parameter { kind: ParamKind },
    Function { params: Vec<ParamKind> },
}

/// Container whose iterators may alias the container's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Bytes,
    List,
    Map,
    Set,
    Stream,
    Vector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Bool,
    Int,
    String,
    Bytes,
    Stream,
    StreamView,
    Iterator(Container),
    Struct { name: String, has_finalizer: bool },
    Other(String),
}

impl Type {
    /// Values of this type may refer to storage owned by another value.
    pub fn is_aliasing(&self) -> bool {
        matches!(self, Type::StreamView | Type::Iterator(_))
    }

    /// Destroying a value of this type runs user code.
    pub fn has_finalizer(&self) -> bool {
        matches!(self, Type::Struct { has_finalizer: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decl {
    pub id: DeclId,
    pub name: String,
    pub kind: DeclKind,
    pub ty: Type,
    /// Referenced from outside the unit being analyzed; never eliminated.
    #[serde(default)]
    pub externally_referenced: bool,
}

impl Decl {
    pub fn is_global(&self) -> bool {
        matches!(self.kind, DeclKind::GlobalVariable)
    }

    pub fn is_inout_param(&self) -> bool {
        matches!(
            self.kind,
            DeclKind::Parameter {
                kind: ParamKind::InOut
            }
        )
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: AstId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Literal(Literal),
    /// A reference to a name, with its resolved declaration if known.
    Name {
        name: String,
        decl: Option<DeclId>,
    },
    Assign {
        target: Box<Expr>,
        source: Box<Expr>,
    },
    Call {
        callee: String,
        function: Option<DeclId>,
        args: Vec<Expr>,
    },
    /// Any other operator application (member access, arithmetic, ...).
    Operator {
        op: String,
        operands: Vec<Expr>,
    },
}

impl Expr {
    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name { .. } => Vec::new(),
            ExprKind::Assign { target, source } => vec![target.as_ref(), source.as_ref()],
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Operator { operands, .. } => operands.iter().collect(),
        }
    }

    /// Pre-order walk over this expression and all sub-expressions.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Resolved declaration if this is a plain name reference.
    pub fn as_name(&self) -> Option<DeclId> {
        match &self.kind {
            ExprKind::Name { decl, .. } => *decl,
            _ => None,
        }
    }

    /// The variable a compound l-value ultimately writes into, e.g. `x` in
    /// `x.a[i]`.
    pub fn base_name(&self) -> Option<DeclId> {
        match &self.kind {
            ExprKind::Name { decl, .. } => *decl,
            ExprKind::Operator { operands, .. } => operands.first().and_then(Expr::base_name),
            _ => None,
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: AstId,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub id: AstId,
    pub kind: StmtKind,
}

/// Loop variable bound by a `for` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopVar {
    pub id: AstId,
    pub decl: DeclId,
    pub name: String,
    pub ty: Type,
}

/// Local variable declaration statement payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub decl: DeclId,
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catch {
    pub id: AstId,
    pub param: Option<DeclId>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    Expr(Expr),
    Block(Block),
    While {
        cond: Expr,
        body: Block,
        else_body: Option<Block>,
    },
    For {
        var: LoopVar,
        seq: Expr,
        body: Block,
    },
    If {
        cond: Expr,
        then_body: Block,
        else_body: Option<Block>,
    },
    Try {
        body: Block,
        catches: Vec<Catch>,
    },
    Return(Option<Expr>),
    Throw(Option<Expr>),
    Break,
    Continue,
    Declaration(LocalDecl),
    Assert(Expr),
    Yield,
    Comment(String),
    SetLocation(String),
}

impl Stmt {
    /// `return`, `throw`, `break` and `continue` end the live flow of a block.
    pub fn transfers_control(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Break | StmtKind::Continue
        )
    }

    /// Walk every expression in this statement, including nested statements.
    pub fn walk_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        match &self.kind {
            StmtKind::Expr(e) | StmtKind::Assert(e) => e.walk(f),
            StmtKind::Return(e) | StmtKind::Throw(e) => {
                if let Some(e) = e {
                    e.walk(f);
                }
            }
            StmtKind::Declaration(local) => {
                if let Some(init) = &local.init {
                    init.walk(f);
                }
            }
            StmtKind::Block(block) => block.walk_exprs(f),
            StmtKind::While {
                cond,
                body,
                else_body,
            } => {
                cond.walk(f);
                body.walk_exprs(f);
                if let Some(else_body) = else_body {
                    else_body.walk_exprs(f);
                }
            }
            StmtKind::For { seq, body, .. } => {
                seq.walk(f);
                body.walk_exprs(f);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.walk(f);
                then_body.walk_exprs(f);
                if let Some(else_body) = else_body {
                    else_body.walk_exprs(f);
                }
            }
            StmtKind::Try { body, catches } => {
                body.walk_exprs(f);
                for catch in catches {
                    catch.body.walk_exprs(f);
                }
            }
            StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Yield
            | StmtKind::Comment(_)
            | StmtKind::SetLocation(_) => {}
        }
    }

    fn blocks_mut(&mut self) -> Vec<&mut Block> {
        match &mut self.kind {
            StmtKind::Block(block) => vec![block],
            StmtKind::While {
                body, else_body, ..
            }
            | StmtKind::If {
                then_body: body,
                else_body,
                ..
            } => {
                let mut blocks = vec![body];
                if let Some(else_body) = else_body {
                    blocks.push(else_body);
                }
                blocks
            }
            StmtKind::For { body, .. } => vec![body],
            StmtKind::Try { body, catches } => {
                let mut blocks = vec![body];
                blocks.extend(catches.iter_mut().map(|c| &mut c.body));
                blocks
            }
            _ => Vec::new(),
        }
    }
}

impl Block {
    pub fn walk_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        for stmt in &self.stmts {
            stmt.walk_exprs(f);
        }
    }

    /// Remove every statement (at any nesting depth) for which `remove`
    /// returns true. Returns the number of statements removed.
    pub fn remove_stmts(&mut self, remove: &impl Fn(&Stmt) -> bool) -> usize {
        let before = self.stmts.len();
        self.stmts.retain(|s| !remove(s));
        let mut removed = before - self.stmts.len();
        for stmt in &mut self.stmts {
            for block in stmt.blocks_mut() {
                removed += block.remove_stmts(remove);
            }
        }
        removed
    }
}

// ── Module-level items ──────────────────────────────────────────────────────

/// A global variable with its (optional) initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVar {
    pub id: AstId,
    pub decl: DeclId,
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<DeclId>,
    pub body: Block,
}

/// A compilation unit: its declarations, globals, top-level statements and
/// functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub decls: Vec<Decl>,
    pub globals: Vec<GlobalVar>,
    pub body: Block,
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl Module {
    pub fn decl(&self, id: DeclId) -> Option<&Decl> {
        self.decls.iter().find(|d| d.id == id)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

// ── Display ─────────────────────────────────────────────────────────────────
//
// Single-line renderings used for graph labels and test assertions.

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::String => write!(f, "string"),
            Type::Bytes => write!(f, "bytes"),
            Type::Stream => write!(f, "stream"),
            Type::StreamView => write!(f, "view<stream>"),
            Type::Iterator(c) => {
                let c = match c {
                    Container::Bytes => "bytes",
                    Container::List => "list",
                    Container::Map => "map",
                    Container::Set => "set",
                    Container::Stream => "stream",
                    Container::Vector => "vector",
                };
                write!(f, "iterator<{c}>")
            }
            Type::Struct { name, .. } => write!(f, "struct {name}"),
            Type::Other(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::String(s) => write!(f, "{s:?}"),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{lit}"),
            ExprKind::Name { name, .. } => write!(f, "{name}"),
            ExprKind::Assign { target, source } => write!(f, "{target} = {source}"),
            ExprKind::Call { callee, args, .. } => {
                write!(f, "{callee}(")?;
                join(f, args)?;
                write!(f, ")")
            }
            ExprKind::Operator { op, operands } => match operands.as_slice() {
                [operand] => write!(f, "{op}{operand}"),
                [lhs, rhs] => write!(f, "{lhs} {op} {rhs}"),
                _ => {
                    write!(f, "{op}(")?;
                    join(f, operands)?;
                    write!(f, ")")
                }
            },
        }
    }
}

impl fmt::Display for LocalDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.init {
            Some(init) => write!(f, "local {} {} = {};", self.ty, self.name, init),
            None => write!(f, "local {} {};", self.ty, self.name),
        }
    }
}

impl fmt::Display for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.init {
            Some(init) => write!(f, "global {} {} = {};", self.ty, self.name, init),
            None => write!(f, "global {} {};", self.ty, self.name),
        }
    }
}

impl fmt::Display for LoopVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local {} {}", self.ty, self.name)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for stmt in &self.stmts {
            write!(f, " {stmt}")?;
        }
        write!(f, " }}")
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmtKind::Expr(e) => write!(f, "{e};"),
            StmtKind::Block(block) => write!(f, "{block}"),
            StmtKind::While {
                cond,
                body,
                else_body,
            } => {
                write!(f, "while ( {cond} ) {body}")?;
                if let Some(else_body) = else_body {
                    write!(f, " else {else_body}")?;
                }
                Ok(())
            }
            StmtKind::For { var, seq, body } => {
                write!(f, "for ( {} in {seq} ) {body}", var.name)
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                write!(f, "if ( {cond} ) {then_body}")?;
                if let Some(else_body) = else_body {
                    write!(f, " else {else_body}")?;
                }
                Ok(())
            }
            StmtKind::Try { body, catches } => {
                write!(f, "try {body}")?;
                for catch in catches {
                    write!(f, " catch {}", catch.body)?;
                }
                Ok(())
            }
            StmtKind::Return(Some(e)) => write!(f, "return {e};"),
            StmtKind::Return(None) => write!(f, "return;"),
            StmtKind::Throw(Some(e)) => write!(f, "throw {e};"),
            StmtKind::Throw(None) => write!(f, "throw;"),
            StmtKind::Break => write!(f, "break;"),
            StmtKind::Continue => write!(f, "continue;"),
            StmtKind::Declaration(local) => write!(f, "{local}"),
            StmtKind::Assert(e) => write!(f, "assert {e};"),
            StmtKind::Yield => write!(f, "yield;"),
            StmtKind::Comment(text) => write!(f, "# {text}"),
            StmtKind::SetLocation(loc) => write!(f, "# location: {loc}"),
        }
    }
}
