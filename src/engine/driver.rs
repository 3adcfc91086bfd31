// src/engine/driver.rs

//! The engine driver: an async shell around [`crate::engine::evaluate`].
//!
//! The driver owns the state store, the work graph, the fingerprint resolver
//! and the process manager. It consumes [`EngineEvent`]s from a single
//! channel, applies the resulting state patches, then re-evaluates and
//! applies effects until a fixpoint. Because everything mutable is owned
//! here and events are handled one at a time, no two mutations ever
//! interleave.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::cycles::{detect_cycles, render_cycle};
use crate::dag::graph::WorkGraph;
use crate::dag::item::{ItemId, WorkItem};
use crate::engine::evaluate::{evaluate, Effect};
use crate::engine::{EngineEvent, EngineOptions, Settlement};
use crate::errors::Result;
use crate::exec::manager::{CancelOutcome, ProcessManager};
use crate::exec::{ExecClass, ExecFactory, ExecOutcome};
use crate::fingerprint::resolver::{Fingerprint, FingerprintResolver};
use crate::runtime::{ExecContext, Runtime};
use crate::state::model::{
    service_phase_label, task_phase_label, EndReason, ServicePhase, TaskPhase,
};
use crate::state::store::StateStore;
use crate::types::CacheMode;

/// Per-item line of the final report.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub id: ItemId,
    pub name: String,
    pub state: String,
    pub detail: Option<String>,
    /// Last captured stdout/stderr lines for failed items.
    pub tail: Vec<String>,
    pub ok: bool,
}

/// Final result of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub items: Vec<ItemReport>,
    pub success: bool,
}

/// The reactive controller for one orchestrator run.
pub struct Orchestrator {
    graph: Arc<WorkGraph>,
    store: StateStore,
    manager: ProcessManager,
    runtime: Arc<dyn Runtime>,
    resolver: FingerprintResolver,
    options: EngineOptions,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,

    /// Items whose in-flight execution was canceled by a watch reset; the
    /// reset is applied once the execution settles.
    pending_resets: HashSet<ItemId>,
    /// Services being torn down; their canceled settlement maps to
    /// `Ended(Terminated)` instead of `Canceled`.
    teardowns: HashSet<ItemId>,
    /// Items errored before anything ran (cycle members) plus items blocked
    /// by them; excluded from fail-fast so cycles stay contained.
    planning_failures: HashSet<ItemId>,
    /// Fingerprints of the currently scheduled run per item, used to write
    /// cache records on success.
    fingerprints: HashMap<ItemId, Fingerprint>,
    /// Output tails of failed executions, for the final report.
    tails: HashMap<ItemId, Vec<String>>,
    cancelling: bool,
    shutting_down: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<WorkGraph>,
        store: StateStore,
        manager: ProcessManager,
        runtime: Arc<dyn Runtime>,
        resolver: FingerprintResolver,
        options: EngineOptions,
        events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        Self {
            graph,
            store,
            manager,
            runtime,
            resolver,
            options,
            events_rx,
            pending_resets: HashSet::new(),
            teardowns: HashSet::new(),
            planning_failures: HashSet::new(),
            fingerprints: HashMap::new(),
            tails: HashMap::new(),
            cancelling: false,
            shutting_down: false,
        }
    }

    /// Main loop: react to events until the run settles (or forever in
    /// watch / keep-services mode, until shutdown).
    pub async fn run(mut self) -> Result<RunReport> {
        info!("orchestrator started");

        self.runtime.initialize(self.store.snapshot())?;
        self.mark_cycles();
        self.sweep();

        while !self.settled() {
            let Some(event) = self.events_rx.recv().await else {
                info!("engine event channel closed; exiting");
                break;
            };
            debug!(?event, "engine received event");
            self.handle_event(event);
            self.sweep();
        }

        info!("orchestrator settled");
        Ok(self.report())
    }

    /// Convert detected cycles into terminal error states before anything
    /// runs; unrelated items are unaffected.
    fn mark_cycles(&mut self) {
        let cycles = detect_cycles(&self.graph);
        if cycles.is_empty() {
            return;
        }

        for cycle in cycles.iter() {
            let rendered = render_cycle(cycle);
            warn!(cycle = %rendered, "dependency cycle; erroring its members");
        }

        for cycle in cycles.iter() {
            let message = format!("dependency cycle: {}", render_cycle(cycle));
            // The path closes on itself; skip the repeated last element.
            for id in cycle.iter().take(cycle.len().saturating_sub(1)) {
                self.planning_failures.insert(id.clone());
                if self.store.snapshot().tasks.contains_key(id) {
                    self.store.patch_task(
                        id,
                        TaskPhase::Error {
                            message: message.clone(),
                        },
                        None,
                    );
                } else if self.store.snapshot().services.contains_key(id) {
                    self.store.patch_service(
                        id,
                        ServicePhase::Error {
                            message: message.clone(),
                        },
                        None,
                    );
                }
            }
        }
    }

    /// Evaluate and apply effects until nothing changes anymore.
    fn sweep(&mut self) {
        loop {
            let effects = evaluate(
                self.store.snapshot(),
                &self.graph,
                &self.options,
                &self.planning_failures,
            );
            let mut progressed = false;
            for effect in effects {
                progressed |= self.apply(effect);
            }
            if !progressed {
                break;
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> bool {
        match effect {
            Effect::ResolveTask(id) => self.resolve_task(&id),
            Effect::StartService(id) => self.start_service(&id),
            Effect::StopService(id) => self.stop_service(&id),
            Effect::FailDependents {
                service: _,
                dependents,
                reason,
            } => self.fail_dependents(&dependents, &reason),
            Effect::MarkBlocked { id, reason } => self.mark_blocked(&id, &reason),
            Effect::CancelAll { failed } => self.cancel_all(&failed),
        }
    }

    /// A pending item can never start because a requirement failed during
    /// planning; error it terminally and extend the containment set so its
    /// own dependents are blocked the same way.
    fn mark_blocked(&mut self, id: &str, reason: &str) -> bool {
        self.planning_failures.insert(id.to_string());

        let snapshot = self.store.snapshot();
        if snapshot.tasks.contains_key(id) {
            warn!(item = %id, reason = %reason, "blocking task");
            self.store.patch_task(
                id,
                TaskPhase::Error {
                    message: reason.to_string(),
                },
                None,
            )
        } else if snapshot.services.contains_key(id) {
            warn!(item = %id, reason = %reason, "blocking service");
            self.store.patch_service(
                id,
                ServicePhase::Error {
                    message: reason.to_string(),
                },
                None,
            )
        } else {
            false
        }
    }

    /// Deps complete, needs running: decide cached-complete vs execute.
    fn resolve_task(&mut self, id: &str) -> bool {
        let Some(item) = self.graph.item(id).cloned() else {
            return false;
        };
        if self.manager.is_tracked(id) {
            return false;
        }

        self.store.patch_task(id, TaskPhase::Starting, None);

        let cache = match self.resolver.check_cache_state(&item) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(item = %id, error = %e, "fingerprint resolution failed");
                self.store.patch_task(
                    id,
                    TaskPhase::Error {
                        message: format!("fingerprint resolution failed: {}", e),
                    },
                    None,
                );
                return true;
            }
        };

        let key = cache.fingerprint.state_key.clone();
        self.fingerprints.insert(id.to_string(), cache.fingerprint);

        if !cache.changed {
            info!(item = %id, "fingerprint unchanged; completing from cache");
            self.store.patch_task(
                id,
                TaskPhase::Completed {
                    cached: true,
                    duration: Duration::ZERO,
                },
                Some(&key),
            );
            return true;
        }

        self.store.patch_task(id, TaskPhase::Ready, Some(&key));
        let factory = self.make_factory(&item, &key);
        self.manager.run(id, &key, ExecClass::Worker, factory);
        true
    }

    /// Launch a pending service.
    fn start_service(&mut self, id: &str) -> bool {
        let Some(item) = self.graph.item(id).cloned() else {
            return false;
        };
        if self.manager.is_tracked(id) {
            return false;
        }

        self.store.patch_service(id, ServicePhase::Starting, None);

        let fingerprint = match self.resolver.compute(&item) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(item = %id, error = %e, "fingerprint resolution failed");
                self.store.patch_service(
                    id,
                    ServicePhase::Error {
                        message: format!("fingerprint resolution failed: {}", e),
                    },
                    None,
                );
                return true;
            }
        };

        let key = fingerprint.state_key.clone();
        self.fingerprints.insert(id.to_string(), fingerprint);

        info!(item = %id, "launching service");
        let factory = self.make_factory(&item, &key);
        self.manager.run(id, &key, ExecClass::Background, factory);
        true
    }

    /// Tear down a service nothing needs anymore.
    fn stop_service(&mut self, id: &str) -> bool {
        if self.teardowns.contains(id) {
            return false;
        }

        info!(item = %id, "service no longer needed; tearing down");
        self.teardowns.insert(id.to_string());

        match self.manager.cancel(id) {
            CancelOutcome::InFlight | CancelOutcome::Dequeued => true,
            CancelOutcome::NotFound => {
                // Nothing in flight (e.g. still launching was never
                // dispatched); transition directly.
                let key = self
                    .store
                    .snapshot()
                    .state_key_of(id)
                    .cloned();
                self.teardowns.remove(id);
                self.store.patch_service(
                    id,
                    ServicePhase::Ended {
                        reason: EndReason::Terminated,
                    },
                    key.as_deref(),
                )
            }
        }
    }

    /// A needed service died: error every live dependent.
    fn fail_dependents(&mut self, dependents: &[ItemId], reason: &str) -> bool {
        let mut progressed = false;
        for id in dependents {
            if self.manager.is_tracked(id) {
                self.manager.cancel(id);
            }
            let snapshot = self.store.snapshot();
            let is_task = snapshot.tasks.contains_key(id);
            let terminal = if is_task {
                snapshot.tasks.get(id).map(|t| t.is_terminal()).unwrap_or(true)
            } else {
                snapshot
                    .services
                    .get(id)
                    .map(|s| s.is_terminal())
                    .unwrap_or(true)
            };
            if terminal {
                continue;
            }

            warn!(item = %id, reason = %reason, "failing dependent of ended service");
            progressed |= if is_task {
                self.store.patch_task(
                    id,
                    TaskPhase::Error {
                        message: reason.to_string(),
                    },
                    None,
                )
            } else {
                self.store.patch_service(
                    id,
                    ServicePhase::Error {
                        message: reason.to_string(),
                    },
                    None,
                )
            };
        }
        progressed
    }

    /// Fail-fast outside watch mode: cancel everything still live.
    fn cancel_all(&mut self, failed: &str) -> bool {
        if self.cancelling {
            return false;
        }
        self.cancelling = true;

        warn!(failed = %failed, "failure outside watch mode; cancelling the run");
        self.manager.cancel_all();
        self.cancel_untracked();
        true
    }

    /// Patch every non-terminal item with no in-flight execution to
    /// canceled. In-flight executions settle through their tokens.
    fn cancel_untracked(&mut self) {
        let task_ids: Vec<ItemId> = self
            .store
            .snapshot()
            .tasks
            .iter()
            .filter(|(id, state)| !state.is_terminal() && !self.manager.is_tracked(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in task_ids {
            self.store.patch_task(&id, TaskPhase::Canceled, None);
        }

        let service_ids: Vec<ItemId> = self
            .store
            .snapshot()
            .services
            .iter()
            .filter(|(id, state)| !state.is_terminal() && !self.manager.is_tracked(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in service_ids {
            self.store.patch_service(&id, ServicePhase::Canceled, None);
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ExecStarted { id, state_key } => self.on_exec_started(&id, &state_key),
            EngineEvent::ExecSettled(settlement) => self.on_settled(settlement),
            EngineEvent::ServiceReady {
                id,
                state_key,
                endpoint,
            } => self.on_service_ready(&id, &state_key, &endpoint),
            EngineEvent::SourceChanged { id } => self.on_source_changed(&id),
            EngineEvent::Shutdown => self.on_shutdown(),
        }
    }

    fn on_exec_started(&mut self, id: &str, state_key: &str) {
        let snapshot = self.store.snapshot();
        if let Some(task) = snapshot.tasks.get(id) {
            if matches!(task.phase, TaskPhase::Ready) {
                self.store
                    .patch_task(id, TaskPhase::Running, Some(state_key));
            }
            return;
        }
        if let Some(service) = snapshot.services.get(id) {
            if matches!(service.phase, ServicePhase::Starting) {
                self.store
                    .patch_service(id, ServicePhase::Ready, Some(state_key));
            }
        }
    }

    fn on_settled(&mut self, settlement: Settlement) {
        let Settlement {
            id,
            state_key,
            outcome,
        } = settlement;

        self.manager.on_settled(&id);

        if let ExecOutcome::Crashed { tail, .. } = &outcome {
            if !tail.is_empty() {
                self.tails.insert(id.clone(), tail.clone());
            }
        }

        // A watch reset superseded this execution: record the terminal
        // state, then reset to pending so the scheduler re-runs it.
        if self.pending_resets.remove(&id) {
            self.apply_settlement(&id, &state_key, outcome);
            self.store.reset_node(&id);
            return;
        }

        // Teardown cancellations map to `Ended(Terminated)`.
        if self.teardowns.remove(&id) {
            self.store.patch_service(
                &id,
                ServicePhase::Ended {
                    reason: EndReason::Terminated,
                },
                Some(&state_key),
            );
            return;
        }

        self.apply_settlement(&id, &state_key, outcome);
    }

    fn apply_settlement(&mut self, id: &str, state_key: &str, outcome: ExecOutcome) {
        let snapshot = self.store.snapshot();

        if let Some(task) = snapshot.tasks.get(id) {
            if task.is_terminal() {
                debug!(item = %id, "settlement for already-terminal task; ignoring");
                return;
            }
            match outcome {
                ExecOutcome::Success { duration } => {
                    if let Some(fingerprint) = self.fingerprints.get(id) {
                        if !matches!(self.resolver.mode(), CacheMode::None) {
                            let item = self.graph.item(id).cloned();
                            if let Some(item) = item {
                                self.resolver.record_success(&item, fingerprint);
                            }
                        }
                    }
                    self.store.patch_task(
                        id,
                        TaskPhase::Completed {
                            cached: false,
                            duration,
                        },
                        Some(state_key),
                    );
                }
                ExecOutcome::Crashed { exit_code, .. } => {
                    self.store
                        .patch_task(id, TaskPhase::Crashed { exit_code }, Some(state_key));
                }
                ExecOutcome::Error { message } => {
                    self.store
                        .patch_task(id, TaskPhase::Error { message }, Some(state_key));
                }
                ExecOutcome::TimedOut => {
                    self.store.patch_task(
                        id,
                        TaskPhase::Error {
                            message: "execution timed out".to_string(),
                        },
                        Some(state_key),
                    );
                }
                ExecOutcome::Canceled => {
                    self.store
                        .patch_task(id, TaskPhase::Canceled, Some(state_key));
                }
            }
            return;
        }

        if let Some(service) = snapshot.services.get(id) {
            if service.is_terminal() {
                debug!(item = %id, "settlement for already-terminal service; ignoring");
                return;
            }
            let phase = match outcome {
                // A service exiting on its own is unexpected regardless of
                // its exit code; dependents may still need it.
                ExecOutcome::Success { .. } | ExecOutcome::Crashed { .. } => ServicePhase::Ended {
                    reason: EndReason::Crashed,
                },
                ExecOutcome::Error { message } => ServicePhase::Error { message },
                ExecOutcome::TimedOut => ServicePhase::Error {
                    message: "execution timed out".to_string(),
                },
                ExecOutcome::Canceled => ServicePhase::Canceled,
            };
            self.store.patch_service(id, phase, Some(state_key));
        }
    }

    fn on_service_ready(&mut self, id: &str, state_key: &str, endpoint: &str) {
        let snapshot = self.store.snapshot();
        let Some(service) = snapshot.services.get(id) else {
            return;
        };
        if !matches!(service.phase, ServicePhase::Ready) {
            debug!(
                item = %id,
                phase = service_phase_label(&service.phase),
                "readiness report for service not in ready phase; ignoring"
            );
            return;
        }
        info!(item = %id, endpoint = %endpoint, "service is running");
        self.store.patch_service(
            id,
            ServicePhase::Running {
                endpoint: endpoint.to_string(),
            },
            Some(state_key),
        );
    }

    /// A debounced source change arrived from the watch controller.
    /// Recompute the fingerprint; if it differs from the scheduled one,
    /// cancel any in-flight run and reset the item to pending.
    fn on_source_changed(&mut self, id: &str) {
        if self.shutting_down {
            return;
        }
        let Some(item) = self.graph.item(id).cloned() else {
            return;
        };

        let stored_key = self.store.snapshot().state_key_of(id).cloned();
        let Some(stored_key) = stored_key else {
            // Still pending; the upcoming run picks the change up anyway.
            return;
        };

        let changed = if matches!(self.resolver.mode(), CacheMode::None) {
            true
        } else {
            match self.resolver.compute(&item) {
                Ok(fingerprint) => fingerprint.state_key != stored_key,
                Err(e) => {
                    warn!(item = %id, error = %e, "fingerprint recompute failed; assuming changed");
                    true
                }
            }
        };

        if !changed {
            debug!(item = %id, "source event but fingerprint unchanged; ignoring");
            return;
        }

        info!(item = %id, "sources changed; invalidating");
        if self.manager.is_tracked(id) {
            self.pending_resets.insert(id.to_string());
            self.manager.cancel(id);
        } else {
            self.store.reset_node(id);
        }
    }

    fn on_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!("shutdown requested; cancelling all executions");
        self.shutting_down = true;
        self.manager.cancel_all();
        self.cancel_untracked();
    }

    /// The run is over when nothing is in flight and either shutdown was
    /// requested, or (outside watch / keep-services mode) every scheduled
    /// item reached a terminal state.
    fn settled(&self) -> bool {
        if self.manager.active_count() > 0 || self.manager.queued_count() > 0 {
            return false;
        }
        if self.shutting_down {
            return true;
        }
        if self.options.watch || self.options.keep_services {
            return false;
        }
        self.store.snapshot().all_terminal()
    }

    fn report(&self) -> RunReport {
        let snapshot = self.store.snapshot();
        let mut items = Vec::new();

        for (id, state) in snapshot.tasks.iter() {
            let (detail, ok) = match &state.phase {
                TaskPhase::Completed { cached, duration } => (
                    Some(if *cached {
                        "from cache".to_string()
                    } else {
                        format!("in {:.1?}", duration)
                    }),
                    true,
                ),
                TaskPhase::Crashed { exit_code } => {
                    (Some(format!("exit code {}", exit_code)), false)
                }
                TaskPhase::Error { message } => (Some(message.clone()), false),
                _ => (None, false),
            };
            items.push(ItemReport {
                id: id.clone(),
                name: display_name(id).to_string(),
                state: task_phase_label(&state.phase).to_string(),
                detail,
                tail: self.tails.get(id).cloned().unwrap_or_default(),
                ok,
            });
        }

        for (id, state) in snapshot.services.iter() {
            let (detail, ok) = match &state.phase {
                ServicePhase::Running { endpoint } => (Some(endpoint.clone()), true),
                ServicePhase::Ended {
                    reason: EndReason::Terminated,
                } => (None, true),
                ServicePhase::Ended {
                    reason: EndReason::Crashed,
                } => (None, false),
                ServicePhase::Error { message } => (Some(message.clone()), false),
                ServicePhase::Canceled => (None, true),
                _ => (None, false),
            };
            items.push(ItemReport {
                id: id.clone(),
                name: display_name(id).to_string(),
                state: service_phase_label(&state.phase).to_string(),
                detail,
                tail: self.tails.get(id).cloned().unwrap_or_default(),
                ok,
            });
        }

        RunReport {
            items,
            success: snapshot.all_tasks_succeeded(),
        }
    }

    fn make_factory(&self, item: &WorkItem, state_key: &str) -> ExecFactory {
        let runtime = self.runtime.clone();
        let item = Arc::new(item.clone());
        let state_key = state_key.to_string();
        Box::new(move |cancel| {
            runtime.execute(
                item,
                ExecContext {
                    state_key,
                    cancel,
                },
            )
        })
    }
}

fn display_name(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}
