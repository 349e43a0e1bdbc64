// Property-based tests for CFG and dataflow invariants.
//
// Generated statement trees (loops, branches, try/catch, early exits,
// dead tails) are lowered and checked for:
// 1. Graph shape: Start/End boundaries, unique edges, stable edge ids
// 2. Identity: each AST node maps to one graph node; live nodes are never
//    structurally unreachable
// 3. Dataflow: kill sets exclude own gens, fixed point is idempotent
// 4. Determinism and pruning: identical fingerprints, pruning converges
// 5. Soundness: a store that some execution path reads at a `return`
//    survives pruning
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::{HashMap, HashSet, VecDeque};

use proptest::prelude::*;
use qcc::ast::{Block, Expr, ExprKind, Module, Stmt, StmtKind, Type};
use qcc::builder::AstBuilder;
use qcc::cfg::{Cfg, CfgNodeId};
use qcc::id::{AstId, DeclId};

// ── Generators ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Shape {
    Lit(i64),
    Store(usize, i64),
    Read(usize),
    Ret,
    RetVar(usize),
    Throw,
    Break,
    Continue,
    If(Vec<Shape>, Option<Vec<Shape>>),
    While(Vec<Shape>, Option<Vec<Shape>>),
    Try(Vec<Shape>, Vec<Vec<Shape>>),
    Block(Vec<Shape>),
}

const VARS: usize = 3;

fn arb_shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        (0i64..5).prop_map(Shape::Lit),
        (0..VARS, 0i64..5).prop_map(|(v, n)| Shape::Store(v, n)),
        (0..VARS).prop_map(Shape::Read),
        Just(Shape::Ret),
        (0..VARS).prop_map(Shape::RetVar),
        Just(Shape::Throw),
        Just(Shape::Break),
        Just(Shape::Continue),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        let block = prop::collection::vec(inner, 0..4);
        prop_oneof![
            (block.clone(), prop::option::of(block.clone()))
                .prop_map(|(t, e)| Shape::If(t, e)),
            (block.clone(), prop::option::of(block.clone()))
                .prop_map(|(b, e)| Shape::While(b, e)),
            (block.clone(), prop::collection::vec(block.clone(), 0..3))
                .prop_map(|(b, c)| Shape::Try(b, c)),
            block.prop_map(Shape::Block),
        ]
    })
}

fn arb_body() -> impl Strategy<Value = Vec<Shape>> {
    prop::collection::vec(arb_shape(), 0..6)
}

fn lower(b: &mut AstBuilder, vars: &[DeclId], shape: &Shape) -> Stmt {
    let block = |b: &mut AstBuilder, shapes: &[Shape]| {
        let stmts = shapes.iter().map(|s| lower(b, vars, s)).collect();
        b.block(stmts)
    };
    match shape {
        Shape::Lit(n) => {
            let e = b.int(*n);
            b.expr_stmt(e)
        }
        Shape::Store(v, n) => {
            let e = b.int(*n);
            b.assign_to(vars[*v], e)
        }
        Shape::Read(v) => {
            let e = b.name(vars[*v]);
            b.expr_stmt(e)
        }
        Shape::Ret => b.ret(None),
        Shape::RetVar(v) => {
            let e = b.name(vars[*v]);
            b.ret(Some(e))
        }
        Shape::Throw => {
            let e = b.string("error");
            b.throw(Some(e))
        }
        Shape::Break => b.break_(),
        Shape::Continue => b.continue_(),
        Shape::If(t, e) => {
            let cond = b.bool(true);
            let t = block(b, t);
            let e = e.as_ref().map(|e| block(b, e));
            b.if_(cond, t, e)
        }
        Shape::While(body, e) => {
            let cond = b.bool(false);
            let body = block(b, body);
            let e = e.as_ref().map(|e| block(b, e));
            b.while_(cond, body, e)
        }
        Shape::Try(body, catches) => {
            let body = block(b, body);
            let catches = catches
                .iter()
                .map(|c| {
                    let cb = block(b, c);
                    b.catch(None, cb)
                })
                .collect();
            b.try_(body, catches)
        }
        Shape::Block(shapes) => {
            let stmts = shapes.iter().map(|s| lower(b, vars, s)).collect();
            b.block_stmt(stmts)
        }
    }
}

fn module_of(shapes: &[Shape]) -> Module {
    let mut b = AstBuilder::new();
    let vars: Vec<DeclId> = (0..VARS)
        .map(|i| b.declare_local(&format!("v{i}"), Type::Int))
        .collect();
    let mut stmts: Vec<Stmt> = vars
        .iter()
        .map(|v| {
            let zero = b.int(0);
            b.local(*v, Some(zero))
        })
        .collect();
    stmts.extend(shapes.iter().map(|s| lower(&mut b, &vars, s)));
    let body = b.block(stmts);
    let f = b.function("f", vec![], body);
    let top = b.block(vec![]);
    b.module("generated", vec![], top, vec![f])
}

fn reachable_from(cfg: &Cfg, roots: &[CfgNodeId]) -> HashSet<CfgNodeId> {
    let mut seen: HashSet<CfgNodeId> = roots.iter().copied().collect();
    let mut queue: VecDeque<CfgNodeId> = roots.iter().copied().collect();
    while let Some(n) = queue.pop_front() {
        for e in cfg.out_edges(n) {
            if seen.insert(e.to) {
                queue.push_back(e.to);
            }
        }
    }
    seen
}

// ── Reference interpreter ───────────────────────────────────────────────────

/// How a statement finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Normal,
    Return,
    Throw,
    Break,
    Continue,
    OutOfFuel,
}

/// Executes a body along one path, tracking which statement last wrote each
/// variable. Conditions come from `choices` (false once exhausted); the
/// analyses never fold literal conditions, so every choice is a path they
/// must account for. A `break`, `continue` or `throw` that leaves the
/// function ends the run.
struct Run<'c> {
    choices: &'c [bool],
    next: usize,
    fuel: usize,
    defs: HashMap<DeclId, AstId>,
    /// Stores read by `return v` along the path.
    observed: Vec<AstId>,
}

impl<'c> Run<'c> {
    fn new(choices: &'c [bool]) -> Self {
        Run {
            choices,
            next: 0,
            fuel: 256,
            defs: HashMap::new(),
            observed: Vec::new(),
        }
    }

    fn choose(&mut self) -> bool {
        let c = self.choices.get(self.next).copied().unwrap_or(false);
        self.next += 1;
        c
    }

    fn block(&mut self, block: &Block) -> Outcome {
        for stmt in &block.stmts {
            let outcome = self.stmt(stmt);
            if outcome != Outcome::Normal {
                return outcome;
            }
        }
        Outcome::Normal
    }

    fn stmt(&mut self, stmt: &Stmt) -> Outcome {
        if self.fuel == 0 {
            return Outcome::OutOfFuel;
        }
        self.fuel -= 1;
        match &stmt.kind {
            StmtKind::Declaration(local) => {
                self.defs.insert(local.decl, stmt.id);
                Outcome::Normal
            }
            StmtKind::Expr(Expr {
                kind: ExprKind::Assign { target, .. },
                ..
            }) => {
                if let Some(decl) = target.as_name() {
                    self.defs.insert(decl, stmt.id);
                }
                Outcome::Normal
            }
            StmtKind::Return(value) => {
                if let Some(def) = value
                    .as_ref()
                    .and_then(Expr::as_name)
                    .and_then(|decl| self.defs.get(&decl).copied())
                {
                    self.observed.push(def);
                }
                Outcome::Return
            }
            StmtKind::Throw(_) => Outcome::Throw,
            StmtKind::Break => Outcome::Break,
            StmtKind::Continue => Outcome::Continue,
            StmtKind::Block(block) => self.block(block),
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                if self.choose() {
                    self.block(then_body)
                } else {
                    match else_body {
                        Some(else_body) => self.block(else_body),
                        None => Outcome::Normal,
                    }
                }
            }
            StmtKind::While {
                body, else_body, ..
            } => loop {
                if self.fuel == 0 {
                    return Outcome::OutOfFuel;
                }
                self.fuel -= 1;
                if !self.choose() {
                    return match else_body {
                        Some(else_body) => self.block(else_body),
                        None => Outcome::Normal,
                    };
                }
                match self.block(body) {
                    Outcome::Normal | Outcome::Continue => {}
                    Outcome::Break => return Outcome::Normal,
                    other => return other,
                }
            },
            StmtKind::Try { body, catches } => match self.block(body) {
                Outcome::Throw if !catches.is_empty() => {
                    let i = if self.choose() { catches.len() - 1 } else { 0 };
                    self.block(&catches[i].body)
                }
                other => other,
            },
            _ => Outcome::Normal,
        }
    }
}

/// Ids of every statement in `block`, at any depth.
fn stmt_ids(block: &Block, ids: &mut HashSet<AstId>) {
    for stmt in &block.stmts {
        ids.insert(stmt.id);
        match &stmt.kind {
            StmtKind::Block(body) => stmt_ids(body, ids),
            StmtKind::While {
                body, else_body, ..
            }
            | StmtKind::If {
                then_body: body,
                else_body,
                ..
            } => {
                stmt_ids(body, ids);
                if let Some(else_body) = else_body {
                    stmt_ids(else_body, ids);
                }
            }
            StmtKind::For { body, .. } => stmt_ids(body, ids),
            StmtKind::Try { body, catches } => {
                stmt_ids(body, ids);
                for catch in catches {
                    stmt_ids(&catch.body, ids);
                }
            }
            _ => {}
        }
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn graph_boundaries_and_edges(shapes in arb_body()) {
        let m = module_of(&shapes);
        let cfg = Cfg::for_function(&m, &m.functions[0]);

        prop_assert_eq!(cfg.in_edges(cfg.start()).count(), 0);
        prop_assert_eq!(cfg.out_edges(cfg.end()).count(), 0);

        let mut pairs = HashSet::new();
        for (i, e) in cfg.edges().iter().enumerate() {
            prop_assert_eq!(e.id.0 as usize, i);
            prop_assert!(pairs.insert((e.from, e.to)), "duplicate edge {:?}", e);
        }
    }

    #[test]
    fn statements_map_to_single_nodes(shapes in arb_body()) {
        let m = module_of(&shapes);
        let mut cfg = Cfg::for_function(&m, &m.functions[0]);
        let node_count = cfg.nodes().len();

        // Re-inserting any lowered statement finds the existing node.
        let lowered: Vec<_> = cfg
            .nodes()
            .iter()
            .filter(|n| !n.data.is_meta())
            .map(|n| (n.id, n.data))
            .collect();
        for (id, data) in lowered {
            prop_assert_eq!(cfg.get_or_add_node(data), id);
        }
        prop_assert_eq!(cfg.nodes().len(), node_count);

        // Whatever the live path reaches is never structurally unreachable.
        let live = reachable_from(&cfg, &[cfg.start()]);
        for dead in cfg.unreachable_nodes() {
            prop_assert!(!live.contains(&dead), "live node reported dead: {}", cfg.node(dead).data);
        }
    }

    #[test]
    fn dataflow_invariants(shapes in arb_body()) {
        let m = module_of(&shapes);
        let mut cfg = Cfg::for_function(&m, &m.functions[0]);
        cfg.populate_reachable_expressions();

        for node in cfg.nodes() {
            let t = cfg.transfer(node.id).unwrap();
            for (decl, own) in &t.gen {
                if let Some(killed) = t.kill.get(decl) {
                    prop_assert!(!killed.contains(own));
                }
            }
        }

        let first: Vec<_> = cfg.nodes().iter().map(|n| cfg.transfer(n.id).cloned()).collect();
        let dead_first = cfg.unreachable_statements();
        cfg.populate_reachable_expressions();
        let second: Vec<_> = cfg.nodes().iter().map(|n| cfg.transfer(n.id).cloned()).collect();
        prop_assert_eq!(first, second);
        prop_assert_eq!(dead_first, cfg.unreachable_statements());
    }

    #[test]
    fn fingerprint_is_deterministic(shapes in arb_body()) {
        let a = module_of(&shapes);
        let b = module_of(&shapes);
        let fa = Cfg::for_function(&a, &a.functions[0]).fingerprint();
        let fb = Cfg::for_function(&b, &b.functions[0]).fingerprint();
        prop_assert_eq!(fa, fb);
    }

    #[test]
    fn pruning_converges(shapes in arb_body()) {
        let mut m = module_of(&shapes);
        let first = qcc::dce::eliminate_dead_code(&mut m, "f").unwrap();
        let second = qcc::dce::eliminate_dead_code(&mut m, "f").unwrap();
        prop_assert!(second.removed.is_empty());
        prop_assert_eq!(second.iterations, 1);
        prop_assert!(first.iterations >= 1);
    }

    #[test]
    fn pruning_keeps_stores_that_returns_read(
        shapes in arb_body(),
        choices in prop::collection::vec(any::<bool>(), 0..24),
    ) {
        let mut m = module_of(&shapes);
        let mut run = Run::new(&choices);
        run.block(&m.functions[0].body);
        let observed = run.observed;

        qcc::dce::eliminate_dead_code(&mut m, "f").unwrap();
        let mut kept = HashSet::new();
        stmt_ids(&m.functions[0].body, &mut kept);
        for def in observed {
            prop_assert!(kept.contains(&def), "store {:?} read by a return was removed", def);
        }
    }
}
