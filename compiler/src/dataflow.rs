// dataflow.rs — Reaching definitions and removable-statement detection
//
// Classifies every CFG node into a `Transfer` (uses, gens, kills, aliases,
// keep), solves reaching definitions to a fixed point, and reports nodes
// whose definitions are never observed and which have no effect of their
// own.
//
// Preconditions: the `Cfg` is fully built.
// Postconditions: after `populate_reachable_expressions`, every node has
//                 `in`/`out` sets; `kill[d]` never contains the node's own
//                 gen of `d`; aliases are symmetric.
// Failure modes: an aliased declaration without a declaring node in the
//                graph → `internal_error` (broken caller invariant).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::ast::*;
use crate::cfg::{Cfg, CfgNodeId, MetaKind, NodeData};
use crate::error::internal_error;
use crate::id::DeclId;

// ── Transfer functions ──────────────────────────────────────────────────────

/// A definition of `decl` made at `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Def {
    pub decl: DeclId,
    pub node: CfgNodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachability {
    pub in_: BTreeSet<Def>,
    pub out: BTreeSet<Def>,
}

/// Per-node dataflow facts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Declarations read at this node.
    pub uses: BTreeSet<DeclId>,
    /// Declarations (re)defined at this node.
    pub gen: BTreeMap<DeclId, CfgNodeId>,
    /// Other nodes whose definition of a declaration this node overwrites.
    pub kill: BTreeMap<DeclId, BTreeSet<CfgNodeId>>,
    pub aliases: BTreeSet<DeclId>,
    /// The node has an effect of its own and must never be removed.
    pub keep: bool,
    /// Control passes to other code here (a call, a yield), which may read
    /// globals and `inout` parameters.
    pub escapes: bool,
    pub reach: Option<Reachability>,
}

impl Transfer {
    fn killed(&self, def: &Def) -> bool {
        self.kill
            .get(&def.decl)
            .is_some_and(|nodes| nodes.contains(&def.node))
    }
}

/// How names read in the current context are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reads {
    /// A plain read.
    Use,
    /// A read in a context whose effect is not modelled; pins the node.
    UseAndKeep,
}

struct Classifier<'c, 'a> {
    cfg: &'c Cfg<'a>,
    node: CfgNodeId,
    transfer: Transfer,
}

impl<'c, 'a> Classifier<'c, 'a> {
    fn new(cfg: &'c Cfg<'a>, node: CfgNodeId) -> Self {
        Classifier {
            cfg,
            node,
            transfer: Transfer::default(),
        }
    }

    fn run(mut self) -> Transfer {
        match self.cfg.node(self.node).data {
            NodeData::Meta { .. } => {}
            // Loop/branch conditions decide control flow.
            NodeData::Expr(e) => {
                self.transfer.keep = true;
                self.reads(e, Reads::Use);
            }
            NodeData::LoopVar(var) => self.declare(var.decl, &var.ty, None),
            NodeData::Global(global) => {
                self.declare(global.decl, &global.ty, global.init.as_ref())
            }
            NodeData::Stmt(stmt) => self.stmt(stmt),
        }
        // Stores observable outside this unit.
        let cfg = self.cfg;
        if self
            .transfer
            .gen
            .keys()
            .any(|d| cfg.decl(*d).is_some_and(|d| d.externally_referenced))
        {
            self.transfer.keep = true;
        }
        self.transfer
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr_stmt(e),
            StmtKind::Declaration(local) => {
                self.declare(local.decl, &local.ty, local.init.as_ref())
            }
            StmtKind::Return(value) => {
                self.transfer.keep = true;
                if let Some(value) = value {
                    self.reads(value, Reads::Use);
                }
            }
            StmtKind::Throw(Some(e)) | StmtKind::Assert(e) => {
                self.transfer.keep = true;
                self.reads(e, Reads::UseAndKeep);
            }
            StmtKind::Yield => {
                self.transfer.keep = true;
                self.transfer.escapes = true;
            }
            StmtKind::Comment(_) | StmtKind::SetLocation(_) => {
                self.transfer.keep = true;
            }
            // Compound statements never become nodes themselves.
            _ => self.transfer.keep = true,
        }
    }

    fn declare(&mut self, decl: DeclId, ty: &Type, init: Option<&'a Expr>) {
        self.transfer.gen.insert(decl, self.node);
        if ty.has_finalizer() {
            self.transfer.keep = true;
        }
        let Some(init) = init else { return };
        self.reads(init, Reads::Use);
        if ty.is_aliasing() {
            init.walk(&mut |e| {
                let Some(aliased) = e.as_name() else { return };
                if let Some(d) = self.cfg.decl(aliased) {
                    if self.cfg.declares_here(d) {
                        self.transfer.aliases.insert(aliased);
                    }
                }
            });
        }
    }

    fn expr_stmt(&mut self, e: &'a Expr) {
        match &e.kind {
            ExprKind::Assign { target, source } => {
                match &target.kind {
                    // A plain store defines the name without reading it.
                    ExprKind::Name { decl: Some(d), .. } => {
                        self.transfer.gen.insert(*d, self.node);
                    }
                    // A partial store (`x.a = ..`, `x[i] = ..`) both reads
                    // and redefines the underlying variable.
                    _ => {
                        match target.base_name() {
                            Some(base) => {
                                self.transfer.gen.insert(base, self.node);
                            }
                            None => self.transfer.keep = true,
                        }
                        self.reads(target, Reads::Use);
                    }
                }
                self.reads(source, Reads::Use);
            }
            ExprKind::Call { .. } => self.reads(e, Reads::Use),
            ExprKind::Literal(_) | ExprKind::Name { .. } | ExprKind::Operator { .. } => {
                self.reads(e, Reads::UseAndKeep)
            }
        }
    }

    /// Record every resolved name in `e` as a use and handle nested calls.
    fn reads(&mut self, e: &'a Expr, mode: Reads) {
        e.walk(&mut |sub| match &sub.kind {
            ExprKind::Name { decl: Some(d), .. } => {
                self.transfer.uses.insert(*d);
                if mode == Reads::UseAndKeep {
                    self.transfer.keep = true;
                }
            }
            ExprKind::Call { function, args, .. } => self.call(*function, args),
            _ => {}
        });
    }

    /// Calls are impure as far as we know; `inout` arguments are redefined.
    fn call(&mut self, function: Option<DeclId>, args: &'a [Expr]) {
        self.transfer.keep = true;
        self.transfer.escapes = true;

        let params = match function.and_then(|f| self.cfg.decl(f)).map(|d| &d.kind) {
            Some(DeclKind::Function { params }) if params.len() == args.len() => params,
            _ => {
                trace!(target: "dataflow", "call with unknown signature");
                return;
            }
        };

        for (param, arg) in params.iter().zip(args) {
            if *param == ParamKind::InOut {
                if let Some(d) = arg.as_name() {
                    self.transfer.gen.insert(d, self.node);
                }
            }
        }
    }
}

// ── Analysis driver ─────────────────────────────────────────────────────────

impl<'a> Cfg<'a> {
    /// Dataflow facts of a node, once populated.
    pub fn transfer(&self, id: CfgNodeId) -> Option<&Transfer> {
        self.transfers.get(id.0 as usize)
    }

    /// Classify every node and derive alias and kill sets.
    pub fn populate_dataflow(&mut self) {
        let mut transfers: Vec<Transfer> = self
            .nodes()
            .iter()
            .map(|n| Classifier::new(self, n.id).run())
            .collect();

        // Make aliasing symmetric.
        for n in 0..transfers.len() {
            let aliased: Vec<DeclId> = transfers[n].aliases.iter().copied().collect();
            if aliased.is_empty() {
                continue;
            }
            let Some(own) = self.nodes()[n].data.declared() else {
                continue;
            };
            for alias in aliased {
                let Some(site) = self.decl_site(alias) else {
                    internal_error(&format!(
                        "could not find CFG node for `{}` aliased in `{}`",
                        self.decl(alias).map_or("<unknown>", |d| d.name.as_str()),
                        self.nodes()[n].data
                    ));
                };
                transfers[site.0 as usize].aliases.insert(own);
            }
        }

        // A use of an aliased name also uses its aliases.
        for n in 0..transfers.len() {
            let mut extra = BTreeSet::new();
            for used in &transfers[n].uses {
                if let Some(site) = self.decl_site(*used) {
                    extra.extend(transfers[site.0 as usize].aliases.iter().copied());
                }
            }
            transfers[n].uses.extend(extra);
        }

        // A node kills every other definition of the names it defines.
        let mut gens: BTreeMap<DeclId, BTreeSet<CfgNodeId>> = BTreeMap::new();
        for t in &transfers {
            for (decl, node) in &t.gen {
                gens.entry(*decl).or_default().insert(*node);
            }
        }
        for t in &mut transfers {
            let kill: BTreeMap<DeclId, BTreeSet<CfgNodeId>> = t
                .gen
                .iter()
                .filter_map(|(decl, own)| {
                    let others: BTreeSet<CfgNodeId> =
                        gens[decl].iter().copied().filter(|n| n != own).collect();
                    (!others.is_empty()).then_some((*decl, others))
                })
                .collect();
            t.kill = kill;
        }

        self.transfers = transfers;
    }

    /// Solve reaching definitions: `in = ∪ out(preds)`,
    /// `out = gen ∪ (in − kill)`, until nothing changes.
    pub fn populate_reachable_expressions(&mut self) {
        if self.transfers.is_empty() {
            self.populate_dataflow();
        }

        let n = self.nodes().len();
        let preds = self.flow_predecessors();

        let mut reach = vec![Reachability::default(); n];
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            let mut changed = false;
            for i in 0..n {
                let incoming: Vec<Def> = preds[i]
                    .iter()
                    .flat_map(|p| reach[p.0 as usize].out.iter().copied())
                    .collect();
                for def in incoming {
                    changed |= reach[i].in_.insert(def);
                }

                let transfer = &self.transfers[i];
                let mut out: Vec<Def> = transfer
                    .gen
                    .iter()
                    .map(|(decl, node)| Def {
                        decl: *decl,
                        node: *node,
                    })
                    .collect();
                out.extend(reach[i].in_.iter().filter(|d| !transfer.killed(d)).copied());
                for def in out {
                    changed |= reach[i].out.insert(def);
                }
            }
            if !changed {
                break;
            }
        }

        debug!(target: "dataflow", iterations, nodes = n, "reaching definitions converged");

        for (t, r) in self.transfers.iter_mut().zip(reach) {
            t.reach = Some(r);
        }
    }

    /// Non-meta nodes none of whose definitions is ever observed and which
    /// are not pinned by `keep`. A definition is observed when a node using
    /// its declaration has it in its `in` set, or when it defines a global or
    /// an `inout` parameter and reaches `End` or an escaping node.
    pub fn unreachable_statements(&self) -> Vec<CfgNodeId> {
        assert!(
            self.transfers.iter().all(|t| t.reach.is_some()) && !self.transfers.is_empty(),
            "reachability must be populated before querying unreachable statements"
        );

        let mut uses: BTreeMap<CfgNodeId, usize> = BTreeMap::new();

        for node in self.nodes() {
            let t = &self.transfers[node.id.0 as usize];
            if !(t.escapes || self.is_end(node.id)) {
                continue;
            }
            let Some(reach) = t.reach.as_ref() else { continue };
            for def in &reach.in_ {
                let visible = self
                    .decl(def.decl)
                    .is_some_and(|d| d.is_global() || d.is_inout_param());
                if visible {
                    *uses.entry(def.node).or_default() += 1;
                }
            }
        }

        for node in self.nodes() {
            if node.data.is_meta() {
                continue;
            }
            let count = uses.entry(node.id).or_default();
            for decl in self.transfers[node.id.0 as usize].gen.keys() {
                let def = Def {
                    decl: *decl,
                    node: node.id,
                };
                *count += self
                    .transfers
                    .iter()
                    .filter(|t| t.uses.contains(decl))
                    .filter(|t| t.reach.as_ref().is_some_and(|r| r.in_.contains(&def)))
                    .count();
            }
        }

        let mut result: Vec<CfgNodeId> = uses
            .into_iter()
            .filter(|(id, count)| {
                *count == 0
                    && !self.node(*id).data.is_meta()
                    && !self.transfers[id.0 as usize].keep
            })
            .map(|(id, _)| id)
            .collect();
        result.sort_by_key(|id| self.node(*id).data.key());
        result
    }

    /// Whether `id` is the synthetic end node.
    pub fn is_end(&self, id: CfgNodeId) -> bool {
        self.node(id).data.meta_kind() == Some(MetaKind::End)
    }
}
