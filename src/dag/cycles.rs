// src/dag/cycles.rs

//! Cycle detection over the planned graph.
//!
//! A cycle is not a fault: every item on a detected cycle is converted into a
//! terminal error state by the engine, and unrelated items still run.

use std::collections::HashSet;

use tracing::warn;

use crate::dag::graph::WorkGraph;
use crate::dag::item::ItemId;

/// A single cycle as the ordered path of ids that closes on itself,
/// e.g. `["a", "b", "a"]`.
pub type CyclePath = Vec<ItemId>;

/// DFS every root, tracking the current path; revisiting a node already on
/// the path yields the full cycle. Each distinct cycle is reported once.
///
/// Returns the list of cycle paths; the union of their members is what the
/// engine marks as errored.
pub fn detect_cycles(graph: &WorkGraph) -> Vec<CyclePath> {
    let mut cycles: Vec<CyclePath> = Vec::new();
    let mut finished: HashSet<ItemId> = HashSet::new();

    let mut roots: Vec<&ItemId> = graph.items().map(|i| &i.id).collect();
    roots.sort();

    for root in roots {
        if finished.contains(root) {
            continue;
        }
        let mut path: Vec<ItemId> = Vec::new();
        visit(graph, root, &mut path, &mut finished, &mut cycles);
    }

    if !cycles.is_empty() {
        warn!(count = cycles.len(), "dependency/need cycles detected");
    }

    cycles
}

/// Ids that participate in any cycle.
pub fn cycle_members(cycles: &[CyclePath]) -> HashSet<ItemId> {
    let mut members = HashSet::new();
    for cycle in cycles {
        for id in cycle {
            members.insert(id.clone());
        }
    }
    members
}

/// Render a cycle path for error messages: `a -> b -> a`.
pub fn render_cycle(cycle: &CyclePath) -> String {
    let names: Vec<&str> = cycle
        .iter()
        .map(|id| id.rsplit(':').next().unwrap_or(id.as_str()))
        .collect();
    names.join(" -> ")
}

fn visit(
    graph: &WorkGraph,
    id: &str,
    path: &mut Vec<ItemId>,
    finished: &mut HashSet<ItemId>,
    cycles: &mut Vec<CyclePath>,
) {
    if let Some(pos) = path.iter().position(|p| p == id) {
        // Found a back edge: the cycle is the path suffix starting at the
        // first occurrence, closed with the revisited node.
        let mut cycle: CyclePath = path[pos..].to_vec();
        cycle.push(id.to_string());
        if !cycles.iter().any(|c| same_cycle(c, &cycle)) {
            cycles.push(cycle);
        }
        return;
    }

    if finished.contains(id) {
        return;
    }

    let Some(item) = graph.item(id) else {
        return;
    };

    path.push(id.to_string());
    for edge in item.deps.iter().chain(item.needs.iter()) {
        visit(graph, edge, path, finished, cycles);
    }
    path.pop();

    finished.insert(id.to_string());
}

/// Two cycle paths describe the same cycle if they contain the same node set.
fn same_cycle(a: &CyclePath, b: &CyclePath) -> bool {
    let sa: HashSet<&ItemId> = a.iter().collect();
    let sb: HashSet<&ItemId> = b.iter().collect();
    sa == sb
}
