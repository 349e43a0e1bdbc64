// dce.rs — Dead code elimination driven by the CFG analyses
//
// Repeatedly builds the graph for a body, runs reaching definitions, and
// deletes statements that are either dataflow-dead or not reachable from
// `Start`, until a round removes nothing. An unreachable loop or branch is
// removed as a whole statement.
//
// Preconditions: the named function exists in `module`.
// Postconditions: the body contains no statement that the analyses would
//                 report on a fresh run, except declarations whose name is
//                 still referenced.
// Failure modes: unknown function name → `QccError::UnknownFunction`.
// Side effects: mutates the pruned body in place.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::ast::{Block, Module, Stmt, StmtKind};
use crate::cfg::{Cfg, NodeData};
use crate::error::QccError;
use crate::id::{AstId, DeclId};

/// Outcome of a pruning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Removed statements, in removal order.
    pub removed: Vec<AstId>,
    /// Analysis rounds, including the final one that removed nothing.
    pub iterations: usize,
}

/// Prune the body of function `name`.
pub fn eliminate_dead_code(module: &mut Module, name: &str) -> Result<PruneReport, QccError> {
    if module.function(name).is_none() {
        return Err(QccError::UnknownFunction {
            module: module.name.clone(),
            function: name.to_string(),
        });
    }

    let mut report = PruneReport::default();
    loop {
        report.iterations += 1;
        let doomed = {
            let Some(function) = module.function(name) else {
                break;
            };
            let mut cfg = Cfg::for_function(module, function);
            removable(&mut cfg, &function.body)
        };
        if doomed.is_empty() {
            break;
        }
        if let Some(function) = module.function_mut(name) {
            remove(&mut function.body, &doomed, &mut report);
        }
    }

    info!(
        target: "dce",
        function = name,
        removed = report.removed.len(),
        iterations = report.iterations,
        "pruned function"
    );
    Ok(report)
}

/// Prune the module's top-level statements. Globals are never removed.
pub fn prune_module_body(module: &mut Module) -> PruneReport {
    let mut report = PruneReport::default();
    loop {
        report.iterations += 1;
        let doomed = {
            let mut cfg = Cfg::for_module(module);
            removable(&mut cfg, &module.body)
        };
        if doomed.is_empty() {
            break;
        }
        remove(&mut module.body, &doomed, &mut report);
    }

    info!(
        target: "dce",
        module = module.name.as_str(),
        removed = report.removed.len(),
        iterations = report.iterations,
        "pruned module body"
    );
    report
}

fn remove(body: &mut Block, doomed: &HashSet<AstId>, report: &mut PruneReport) {
    let mut ids: Vec<AstId> = doomed.iter().copied().collect();
    ids.sort();
    for id in &ids {
        debug!(target: "dce", stmt = id.0, "removing statement");
    }
    body.remove_stmts(&|s: &Stmt| doomed.contains(&s.id));
    report.removed.extend(ids);
}

/// Statements of `body` that one analysis round marks for removal.
///
/// A dead condition, sequence or loop variable takes its whole loop or
/// branch with it.
fn removable(cfg: &mut Cfg, body: &Block) -> HashSet<AstId> {
    cfg.populate_reachable_expressions();
    let cfg: &Cfg = cfg;

    let unused = cfg
        .unreachable_statements()
        .into_iter()
        .filter_map(|id| match cfg.node(id).data {
            // Conditions and loop variables that are merely unused stay
            // with their statement.
            NodeData::Stmt(stmt) => Some(stmt),
            _ => None,
        });
    let dead = cfg.dead_nodes().into_iter().filter_map(|id| cfg.owner(id));

    let references = name_references(body);

    unused
        .chain(dead)
        .filter(|stmt| match &stmt.kind {
            StmtKind::Declaration(local) => !references.contains_key(&local.decl),
            _ => true,
        })
        .map(|stmt| stmt.id)
        .collect()
}

/// Number of name references to each declaration in `body`.
fn name_references(body: &Block) -> HashMap<DeclId, usize> {
    let mut counts = HashMap::new();
    body.walk_exprs(&mut |e| {
        if let Some(d) = e.as_name() {
            *counts.entry(d).or_insert(0) += 1;
        }
    });
    counts
}
