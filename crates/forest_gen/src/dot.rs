//! DOT rendering of reduction forests, one digraph per sink.

use crate::jsonl::PathRecord;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// Groups paths by their sink id, preserving ascending sink order.
pub fn group_by_sink(paths: &[PathRecord]) -> BTreeMap<u32, Vec<&PathRecord>> {
    let mut groups: BTreeMap<u32, Vec<&PathRecord>> = BTreeMap::new();
    for path in paths {
        groups.entry(path.sink).or_default().push(path);
    }
    groups
}

/// Writes one digraph covering every path that converges on `sink`.
///
/// Nodes are labeled from `labels` where available (falling back to the
/// numeric id); edges are the recorded rewrites, deduplicated.
pub fn write_dot<W: Write>(
    out: &mut W,
    sink: u32,
    paths: &[&PathRecord],
    labels: &BTreeMap<u32, String>,
) -> std::io::Result<()> {
    let mut nodes: BTreeSet<u32> = BTreeSet::new();
    let mut edges: BTreeSet<(u32, u32)> = BTreeSet::new();
    for path in paths {
        nodes.insert(path.source);
        nodes.insert(path.sink);
        for step in &path.steps {
            nodes.insert(step.from);
            nodes.insert(step.to);
            edges.insert((step.from, step.to));
        }
    }

    writeln!(out, "digraph sink_{sink} {{")?;
    writeln!(out, "  rankdir=LR;")?;
    for id in &nodes {
        let label = labels.get(id).map_or_else(|| id.to_string(), Clone::clone);
        let shape = if *id == sink { "doublecircle" } else { "ellipse" };
        writeln!(
            out,
            "  n{id} [label=\"{}\", shape={shape}];",
            escape(&label)
        )?;
    }
    for (from, to) in &edges {
        writeln!(out, "  n{from} -> n{to};")?;
    }
    writeln!(out, "}}")
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
