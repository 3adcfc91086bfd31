// src/engine/evaluate.rs

//! Pure scheduling decisions.
//!
//! [`evaluate`] inspects the current snapshot against the work graph and
//! returns the side effects the driver should perform. It is deterministic,
//! performs no IO, and is re-invoked after every state mutation; the driver
//! applies effects until a fixpoint is reached.

use std::collections::HashSet;

use crate::dag::graph::WorkGraph;
use crate::dag::item::ItemId;
use crate::engine::EngineOptions;
use crate::state::model::{EndReason, ServicePhase, Snapshot, TaskPhase};

/// A side effect the driver should carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A pending task's deps are complete and its needs are running: check
    /// its cache state, then either complete it as cached or execute it.
    ResolveTask(ItemId),
    /// A pending service is required and its own deps/needs are satisfied:
    /// launch it.
    StartService(ItemId),
    /// A launched (or still pending) service is no longer required by any
    /// non-terminal item: tear it down.
    StopService(ItemId),
    /// A needed service ended while dependents still required it: propagate
    /// an error to each of them.
    FailDependents {
        service: ItemId,
        dependents: Vec<ItemId>,
        reason: String,
    },
    /// A pending item can never start because a requirement failed during
    /// planning (dependency cycle); mark it terminally errored so the run
    /// can settle.
    MarkBlocked { id: ItemId, reason: String },
    /// A crash/error outside watch mode: cancel everything still in flight.
    CancelAll { failed: ItemId },
}

/// Evaluate the snapshot and produce the next round of effects.
///
/// `planning_failures` holds the ids that were errored before anything ran
/// (cycle members). They must not trip the fail-fast pass — a cycle is
/// contained to its members and their dependents, never to unrelated work.
pub fn evaluate(
    snapshot: &Snapshot,
    graph: &WorkGraph,
    options: &EngineOptions,
    planning_failures: &HashSet<ItemId>,
) -> Vec<Effect> {
    let mut effects: Vec<Effect> = Vec::new();
    let mut services_to_start: Vec<ItemId> = Vec::new();

    // Service-ended propagation runs in every mode: dependents of a dead
    // service can never proceed, and the reason must reach their state.
    for (id, state) in snapshot.services.iter() {
        if planning_failures.contains(id) {
            continue;
        }
        let reason = match &state.phase {
            ServicePhase::Ended {
                reason: EndReason::Crashed,
            } => format!("needed service '{}' ended: crashed", display_name(id)),
            ServicePhase::Error { message } => {
                format!("needed service '{}' ended: {}", display_name(id), message)
            }
            _ => continue,
        };

        let dependents: Vec<ItemId> = graph
            .dependents_of(id)
            .iter()
            .filter(|dep| needs_service(graph, dep, id))
            .filter(|dep| snapshot.is_active(dep))
            .cloned()
            .collect();

        if !dependents.is_empty() {
            effects.push(Effect::FailDependents {
                service: id.clone(),
                dependents,
                reason,
            });
        }
    }

    // Pending tasks: skip while deps are open, promote pending needs, wait
    // for launching needs, resolve once everything is satisfied.
    for (id, state) in snapshot.tasks.iter() {
        if !matches!(state.phase, TaskPhase::Pending) {
            continue;
        }
        let Some(item) = graph.item(id) else {
            continue;
        };

        if let Some(reason) = blocked_by_planning_failure(item.deps.iter().chain(item.needs.iter()), planning_failures) {
            effects.push(Effect::MarkBlocked {
                id: id.clone(),
                reason,
            });
            continue;
        }

        if graph.failed_dep(item, snapshot).is_some() {
            // The dependent can never start. Outside watch mode the
            // fail-fast pass below cancels it; inside watch mode it stays
            // pending until the dep is reset.
            continue;
        }
        if graph.has_open_deps(item, snapshot) {
            continue;
        }

        // Pending needs are promoted by the service pass below (a pending
        // dependent counts as "still needed"); the task waits either way.
        if !graph.pending_needs(item, snapshot).is_empty() {
            continue;
        }
        if !graph.unready_needs(item, snapshot).is_empty() {
            continue;
        }

        effects.push(Effect::ResolveTask(id.clone()));
    }

    // Pending services: launch when something non-terminal still requires
    // them (or everything is kept up), their deps are complete and the
    // services *they* need are running.
    for (id, state) in snapshot.services.iter() {
        if !matches!(state.phase, ServicePhase::Pending) {
            continue;
        }
        let Some(item) = graph.item(id) else {
            continue;
        };

        if let Some(reason) = blocked_by_planning_failure(item.deps.iter().chain(item.needs.iter()), planning_failures) {
            effects.push(Effect::MarkBlocked {
                id: id.clone(),
                reason,
            });
            continue;
        }

        let required = options.keep_services || graph.is_still_needed(id, snapshot);
        if !required {
            continue;
        }
        if graph.failed_dep(item, snapshot).is_some() || graph.has_open_deps(item, snapshot) {
            continue;
        }

        // A service with unready needs of its own waits; its needs are
        // themselves pending services this same pass picks up.
        if !graph.unready_needs(item, snapshot).is_empty() {
            continue;
        }

        services_to_start.push(id.clone());
    }

    // Teardown: launched (or never-launched) services nothing needs anymore.
    //
    // Skipped in watch mode: a watched task may reset and need its service
    // again, and ended services cannot be relaunched.
    if !options.keep_services && !options.watch {
        for (id, state) in snapshot.services.iter() {
            if planning_failures.contains(id) {
                continue;
            }
            let reapable = matches!(
                state.phase,
                ServicePhase::Pending
                    | ServicePhase::Starting
                    | ServicePhase::Ready
                    | ServicePhase::Running { .. }
            );
            if reapable && !graph.is_still_needed(id, snapshot) {
                effects.push(Effect::StopService(id.clone()));
            }
        }
    }

    // Deduplicate service starts (a service may be promoted through several
    // dependents in the same pass) while preserving order.
    let mut seen: HashSet<ItemId> = HashSet::new();
    for id in services_to_start {
        if matches!(
            snapshot.services.get(&id).map(|s| &s.phase),
            Some(ServicePhase::Pending)
        ) && seen.insert(id.clone())
        {
            effects.push(Effect::StartService(id));
        }
    }

    // Fail-fast: outside watch mode the first crash/error takes the whole
    // run down. Watch mode contains the failure so the rest of the graph
    // keeps functioning. Cancellations and planning-time cycle errors don't
    // re-trigger this.
    if !options.watch {
        let failed_task = snapshot
            .tasks
            .iter()
            .filter(|(id, _)| !planning_failures.contains(*id))
            .find(|(_, s)| {
                matches!(s.phase, TaskPhase::Crashed { .. } | TaskPhase::Error { .. })
            });
        let failed_service = snapshot
            .services
            .iter()
            .filter(|(id, _)| !planning_failures.contains(*id))
            .find(|(_, s)| {
                matches!(
                    s.phase,
                    ServicePhase::Error { .. }
                        | ServicePhase::Ended {
                            reason: EndReason::Crashed
                        }
                )
            });

        if let Some(id) = failed_task
            .map(|(id, _)| id)
            .or(failed_service.map(|(id, _)| id))
        {
            effects.push(Effect::CancelAll { failed: id.clone() });
        }
    }

    effects
}

/// If any requirement is a planning-time failure (cycle member), the reason
/// the dependent can never start.
fn blocked_by_planning_failure<'a>(
    requirements: impl Iterator<Item = &'a ItemId>,
    planning_failures: &HashSet<ItemId>,
) -> Option<String> {
    for req in requirements {
        if planning_failures.contains(req) {
            return Some(format!(
                "requirement '{}' is part of a dependency cycle",
                display_name(req)
            ));
        }
    }
    None
}

fn needs_service(graph: &WorkGraph, dependent: &str, service: &str) -> bool {
    graph
        .item(dependent)
        .map(|item| item.needs.iter().any(|n| n == service))
        .unwrap_or(false)
}

fn display_name(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}
