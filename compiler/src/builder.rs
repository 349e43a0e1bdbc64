// builder.rs — Programmatic AST construction
//
// Front-ends and tests assemble modules through `AstBuilder`, which hands
// out fresh ids and records every declaration so `name()` references carry
// a resolved `DeclId`.
//
// Preconditions: `DeclId`s passed back in were produced by this builder.
// Postconditions: `module()` yields a `Module` whose decl table holds every
//                 declaration made through the builder.
// Failure modes: none.
// Side effects: none.

use crate::ast::*;
use crate::id::{AstId, DeclId, IdAllocator};

#[derive(Debug, Default)]
pub struct AstBuilder {
    ids: IdAllocator,
    decls: Vec<Decl>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> AstId {
        self.ids.alloc_ast()
    }

    // ── Declarations ──

    pub fn declare(&mut self, name: &str, kind: DeclKind, ty: Type) -> DeclId {
        let id = self.ids.alloc_decl();
        self.decls.push(Decl {
            id,
            name: name.to_string(),
            kind,
            ty,
            externally_referenced: false,
        });
        id
    }

    pub fn declare_global(&mut self, name: &str, ty: Type) -> DeclId {
        self.declare(name, DeclKind::GlobalVariable, ty)
    }

    pub fn declare_local(&mut self, name: &str, ty: Type) -> DeclId {
        self.declare(name, DeclKind::LocalVariable, ty)
    }

    pub fn declare_param(&mut self, name: &str, ty: Type, kind: ParamKind) -> DeclId {
        self.declare(name, DeclKind::Parameter { kind }, ty)
    }

    pub fn declare_function(&mut self, name: &str, params: Vec<ParamKind>) -> DeclId {
        self.declare(
            name,
            DeclKind::Function { params },
            Type::Other("function".into()),
        )
    }

    /// Mark a declaration as referenced from outside the module.
    pub fn mark_external(&mut self, decl: DeclId) {
        self.decl_mut(decl).externally_referenced = true;
    }

    fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        // Decl ids are handed out densely from zero by this builder.
        &mut self.decls[id.0 as usize]
    }

    fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.0 as usize]
    }

    // ── Expressions ──

    pub fn expr(&mut self, kind: ExprKind) -> Expr {
        Expr {
            id: self.next(),
            kind,
        }
    }

    pub fn int(&mut self, n: i64) -> Expr {
        self.expr(ExprKind::Literal(Literal::Int(n)))
    }

    pub fn bool(&mut self, b: bool) -> Expr {
        self.expr(ExprKind::Literal(Literal::Bool(b)))
    }

    pub fn string(&mut self, s: &str) -> Expr {
        self.expr(ExprKind::Literal(Literal::String(s.to_string())))
    }

    pub fn name(&mut self, decl: DeclId) -> Expr {
        let name = self.decl(decl).name.clone();
        self.expr(ExprKind::Name {
            name,
            decl: Some(decl),
        })
    }

    /// A name reference that did not resolve to any declaration.
    pub fn unresolved(&mut self, name: &str) -> Expr {
        self.expr(ExprKind::Name {
            name: name.to_string(),
            decl: None,
        })
    }

    pub fn op(&mut self, op: &str, operands: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Operator {
            op: op.to_string(),
            operands,
        })
    }

    pub fn assign(&mut self, target: Expr, source: Expr) -> Expr {
        self.expr(ExprKind::Assign {
            target: Box::new(target),
            source: Box::new(source),
        })
    }

    pub fn call(&mut self, function: DeclId, args: Vec<Expr>) -> Expr {
        let callee = self.decl(function).name.clone();
        self.expr(ExprKind::Call {
            callee,
            function: Some(function),
            args,
        })
    }

    // ── Statements ──

    pub fn stmt(&mut self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.next(),
            kind,
        }
    }

    pub fn expr_stmt(&mut self, e: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(e))
    }

    /// `decl = source;`
    pub fn assign_to(&mut self, decl: DeclId, source: Expr) -> Stmt {
        let target = self.name(decl);
        let e = self.assign(target, source);
        self.expr_stmt(e)
    }

    pub fn local(&mut self, decl: DeclId, init: Option<Expr>) -> Stmt {
        let d = self.decl(decl);
        let local = LocalDecl {
            decl,
            name: d.name.clone(),
            ty: d.ty.clone(),
            init,
        };
        self.stmt(StmtKind::Declaration(local))
    }

    pub fn ret(&mut self, e: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Return(e))
    }

    pub fn throw(&mut self, e: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Throw(e))
    }

    pub fn break_(&mut self) -> Stmt {
        self.stmt(StmtKind::Break)
    }

    pub fn continue_(&mut self) -> Stmt {
        self.stmt(StmtKind::Continue)
    }

    pub fn assert(&mut self, e: Expr) -> Stmt {
        self.stmt(StmtKind::Assert(e))
    }

    pub fn yield_(&mut self) -> Stmt {
        self.stmt(StmtKind::Yield)
    }

    pub fn comment(&mut self, text: &str) -> Stmt {
        self.stmt(StmtKind::Comment(text.to_string()))
    }

    pub fn block(&mut self, stmts: Vec<Stmt>) -> Block {
        Block {
            id: self.next(),
            stmts,
        }
    }

    pub fn block_stmt(&mut self, stmts: Vec<Stmt>) -> Stmt {
        let block = self.block(stmts);
        self.stmt(StmtKind::Block(block))
    }

    pub fn if_(&mut self, cond: Expr, then_body: Block, else_body: Option<Block>) -> Stmt {
        self.stmt(StmtKind::If {
            cond,
            then_body,
            else_body,
        })
    }

    pub fn while_(&mut self, cond: Expr, body: Block, else_body: Option<Block>) -> Stmt {
        self.stmt(StmtKind::While {
            cond,
            body,
            else_body,
        })
    }

    pub fn for_(&mut self, var: DeclId, seq: Expr, body: Block) -> Stmt {
        let d = self.decl(var);
        let (name, ty) = (d.name.clone(), d.ty.clone());
        let var = LoopVar {
            id: self.next(),
            decl: var,
            name,
            ty,
        };
        self.stmt(StmtKind::For { var, seq, body })
    }

    pub fn catch(&mut self, param: Option<DeclId>, body: Block) -> Catch {
        Catch {
            id: self.next(),
            param,
            body,
        }
    }

    pub fn try_(&mut self, body: Block, catches: Vec<Catch>) -> Stmt {
        self.stmt(StmtKind::Try { body, catches })
    }

    // ── Module items ──

    pub fn global(&mut self, decl: DeclId, init: Option<Expr>) -> GlobalVar {
        let d = self.decl(decl);
        let (name, ty) = (d.name.clone(), d.ty.clone());
        GlobalVar {
            id: self.next(),
            decl,
            name,
            ty,
            init,
        }
    }

    pub fn function(&mut self, name: &str, params: Vec<DeclId>, body: Block) -> Function {
        Function {
            name: name.to_string(),
            params,
            body,
        }
    }

    /// Finish a module. The builder keeps its id counters so further
    /// modules built from it never reuse ids.
    pub fn module(
        &mut self,
        name: &str,
        globals: Vec<GlobalVar>,
        body: Block,
        functions: Vec<Function>,
    ) -> Module {
        Module {
            name: name.to_string(),
            decls: self.decls.clone(),
            globals,
            body,
            functions,
        }
    }
}
