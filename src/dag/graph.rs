// src/dag/graph.rs

use std::collections::HashMap;

use crate::dag::item::{ItemId, WorkItem};
use crate::state::model::Snapshot;

/// In-memory graph of planned work items keyed by id.
///
/// The arena owns every [`WorkItem`]; `deps`/`needs` edges are id references
/// into the same arena, so diamond dependencies share one node and run once.
/// Read-only after planning.
#[derive(Debug, Clone, Default)]
pub struct WorkGraph {
    items: HashMap<ItemId, WorkItem>,
    /// Reverse edges: for each item, the items whose `deps` or `needs`
    /// reference it.
    dependents: HashMap<ItemId, Vec<ItemId>>,
}

impl WorkGraph {
    /// Build a graph from already-linked items (every `deps`/`needs` entry
    /// must be an id present in `items`). Use [`crate::dag::plan::plan_graph`]
    /// to get here from a build file.
    pub fn from_items(items: Vec<WorkItem>) -> Self {
        let mut map: HashMap<ItemId, WorkItem> = HashMap::new();
        for item in items {
            map.insert(item.id.clone(), item);
        }

        let mut dependents: HashMap<ItemId, Vec<ItemId>> = HashMap::new();
        for item in map.values() {
            for edge in item.deps.iter().chain(item.needs.iter()) {
                dependents
                    .entry(edge.clone())
                    .or_default()
                    .push(item.id.clone());
            }
        }
        for list in dependents.values_mut() {
            list.sort();
            list.dedup();
        }

        Self {
            items: map,
            dependents,
        }
    }

    pub fn item(&self, id: &str) -> Option<&WorkItem> {
        self.items.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values().filter(|i| i.is_task())
    }

    pub fn services(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values().filter(|i| i.is_service())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Resolve an item by its plain name. Names are unique across a loaded
    /// build file, so at most one item matches.
    pub fn by_name(&self, name: &str) -> Option<&WorkItem> {
        self.items.values().find(|i| i.name == name)
    }

    /// Items whose `deps` or `needs` reference `id`.
    pub fn dependents_of(&self, id: &str) -> &[ItemId] {
        self.dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The transitive closure of an item's requirements (deps and needs),
    /// including the item itself. This is the subgraph one `exec` run
    /// schedules.
    pub fn closure_of(&self, id: &str) -> Vec<ItemId> {
        let mut stack = vec![id.to_string()];
        let mut seen: Vec<ItemId> = Vec::new();

        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            if let Some(item) = self.items.get(&current) {
                seen.push(current);
                for edge in item.deps.iter().chain(item.needs.iter()) {
                    stack.push(edge.clone());
                }
            }
        }

        seen.sort();
        seen
    }

    /// True if any of the task's deps has not reached terminal success.
    pub fn has_open_deps(&self, item: &WorkItem, snapshot: &Snapshot) -> bool {
        item.deps.iter().any(|dep| {
            snapshot
                .tasks
                .get(dep)
                .map(|state| !state.is_success())
                .unwrap_or(true)
        })
    }

    /// The first dep of `item` that reached a terminal failure, if any.
    pub fn failed_dep<'a>(&self, item: &'a WorkItem, snapshot: &Snapshot) -> Option<&'a ItemId> {
        item.deps.iter().find(|dep| {
            snapshot
                .tasks
                .get(dep.as_str())
                .map(|state| state.is_failure())
                .unwrap_or(false)
        })
    }

    /// Needs whose service is still `Pending` (not yet promoted).
    pub fn pending_needs<'a>(&self, item: &'a WorkItem, snapshot: &Snapshot) -> Vec<&'a ItemId> {
        item.needs
            .iter()
            .filter(|need| {
                snapshot
                    .services
                    .get(need.as_str())
                    .map(|state| {
                        matches!(state.phase, crate::state::model::ServicePhase::Pending)
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Needs whose service is not yet `Running` (pending, launching, or not
    /// yet accepting traffic).
    pub fn unready_needs<'a>(&self, item: &'a WorkItem, snapshot: &Snapshot) -> Vec<&'a ItemId> {
        item.needs
            .iter()
            .filter(|need| {
                snapshot
                    .services
                    .get(need.as_str())
                    .map(|state| !state.is_running())
                    .unwrap_or(true)
            })
            .collect()
    }

    /// True if any non-terminal item in the snapshot still has a `deps` or
    /// `needs` edge to this service. Drives teardown.
    pub fn is_still_needed(&self, service_id: &str, snapshot: &Snapshot) -> bool {
        self.dependents_of(service_id)
            .iter()
            .any(|dependent| snapshot.is_active(dependent))
    }
}
