// dot.rs — Graphviz DOT output for control-flow graphs
//
// Renders a `Cfg` with deterministic node numbering. When dataflow has been
// populated, each node carries an `xlabel` summarizing its transfer
// function; this text is a debugging aid, not a stable format.
//
// Preconditions: `cfg` is fully built.
// Postconditions: returns a DOT string; identical graphs render identically.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::HashMap;
use std::fmt::Write;

use crate::cfg::{Cfg, CfgNodeId, MetaKind, NodeData};
use crate::dataflow::Transfer;
use crate::id::DeclId;

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(cfg: &Cfg) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph {{");

    let mut dot_ids: HashMap<CfgNodeId, usize> = HashMap::new();
    for (dot_id, node) in cfg.sorted_nodes().into_iter().enumerate() {
        dot_ids.insert(node, dot_id);

        let xlabel = cfg
            .transfer(node)
            .map(|t| format!(" xlabel=\"{}\"", xlabel(cfg, t)))
            .unwrap_or_default();

        let data = cfg.node(node).data;
        match data {
            NodeData::Meta { kind, .. } => {
                let shape = match kind {
                    MetaKind::Start => "label=start shape=Mdiamond",
                    MetaKind::End => "label=end shape=Msquare",
                    MetaKind::Flow => "shape=point",
                };
                let _ = writeln!(buf, "\t{dot_id} [{shape}{xlabel}];");
            }
            _ => {
                let _ = writeln!(
                    buf,
                    "\t{dot_id} [label=\"{}\"{xlabel}];",
                    escape(&data.to_string())
                );
            }
        }
    }

    // Edges are already in insertion order.
    for edge in cfg.edges() {
        let _ = writeln!(
            buf,
            "\t{} -> {} [label=\"{}\"];",
            dot_ids[&edge.from], dot_ids[&edge.to], edge.id.0
        );
    }

    buf.push('}');
    buf
}

fn xlabel(cfg: &Cfg, t: &Transfer) -> String {
    let decl_name = |d: &DeclId| {
        cfg.decl(*d)
            .map_or_else(|| format!("<decl {}>", d.0), |d| escape(&d.name))
    };
    let node_label = |n: &CfgNodeId| escape(&cfg.node(*n).data.to_string());
    let sorted = |mut xs: Vec<String>| {
        xs.sort();
        xs.join(", ")
    };

    let mut parts = Vec::new();

    if !t.uses.is_empty() {
        parts.push(format!(
            "use: [{}]",
            sorted(t.uses.iter().map(decl_name).collect())
        ));
    }

    if !t.gen.is_empty() {
        let gens = t
            .gen
            .iter()
            .map(|(d, n)| format!("{}: {}", decl_name(d), node_label(n)))
            .collect();
        parts.push(format!("gen: [{}]", sorted(gens)));
    }

    if !t.kill.is_empty() {
        let mut kills: Vec<String> = t
            .kill
            .iter()
            .map(|(d, ns)| {
                format!(
                    "{}: [{}]",
                    decl_name(d),
                    sorted(ns.iter().map(node_label).collect())
                )
            })
            .collect();
        kills.sort();
        parts.push(format!("kill: [{}]", kills.join(" ")));
    }

    if let Some(reach) = &t.reach {
        let defs = |xs: &std::collections::BTreeSet<crate::dataflow::Def>| {
            sorted(xs.iter().map(|d| node_label(&d.node)).collect())
        };
        parts.push(format!(
            "reach: {{ in: [{}] out: [{}] }}",
            defs(&reach.in_),
            defs(&reach.out)
        ));
    }

    if !t.aliases.is_empty() {
        parts.push(format!(
            "aliases: [{}]",
            sorted(t.aliases.iter().map(decl_name).collect())
        ));
    }

    if t.keep {
        parts.push("keep".to_string());
    }

    parts.join(" ")
}

/// Escape a label for use inside a double-quoted DOT string.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
