// src/exec/manager.rs

//! The process manager: admission control and cancellation for executions.
//!
//! All methods are called from the engine's event loop; the manager itself
//! never blocks. Executions run as spawned Tokio tasks and report start and
//! settlement back over the engine event channel.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::item::{ItemId, StateKey};
use crate::engine::{EngineEvent, Settlement};
use crate::exec::{ExecClass, ExecFactory, ExecOutcome};

/// Handle for one in-flight execution.
struct ActiveExecution {
    class: ExecClass,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// A worker-class execution waiting for a slot.
struct QueuedExecution {
    id: ItemId,
    state_key: StateKey,
    factory: ExecFactory,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The execution is in flight; its token fired and a `Canceled`
    /// settlement will arrive once it unwinds.
    InFlight,
    /// The execution was still queued; it was removed and a synthetic
    /// `Canceled` settlement has been emitted.
    Dequeued,
    NotFound,
}

pub struct ProcessManager {
    /// Maximum concurrently running worker-class executions; 0 = unbounded.
    worker_limit: usize,
    events: mpsc::UnboundedSender<EngineEvent>,
    /// Parent of every per-execution token; canceling it cancels everything.
    shutdown: CancellationToken,
    active: HashMap<ItemId, ActiveExecution>,
    queued: VecDeque<QueuedExecution>,
    active_workers: usize,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("worker_limit", &self.worker_limit)
            .field("active", &self.active.len())
            .field("queued", &self.queued.len())
            .finish_non_exhaustive()
    }
}

impl ProcessManager {
    pub fn new(
        worker_limit: usize,
        events: mpsc::UnboundedSender<EngineEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            worker_limit,
            events,
            shutdown,
            active: HashMap::new(),
            queued: VecDeque::new(),
            active_workers: 0,
        }
    }

    /// Schedule an execution for `id`.
    ///
    /// Returns `false` (and does nothing) if an execution for the same id is
    /// already in flight or queued: at most one execution per item exists at
    /// any time, and the engine is expected not to double-dispatch.
    pub fn run(
        &mut self,
        id: &str,
        state_key: &str,
        class: ExecClass,
        factory: ExecFactory,
    ) -> bool {
        if self.active.contains_key(id) || self.queued.iter().any(|q| q.id == id) {
            warn!(item = %id, "execution already in flight; rejecting duplicate run");
            return false;
        }

        match class {
            ExecClass::Background => {
                self.spawn(id.to_string(), state_key.to_string(), class, factory);
            }
            ExecClass::Worker => {
                if self.worker_limit == 0 || self.active_workers < self.worker_limit {
                    self.spawn(id.to_string(), state_key.to_string(), class, factory);
                } else {
                    debug!(
                        item = %id,
                        active = self.active_workers,
                        limit = self.worker_limit,
                        "worker limit reached; queueing execution"
                    );
                    self.queued.push_back(QueuedExecution {
                        id: id.to_string(),
                        state_key: state_key.to_string(),
                        factory,
                    });
                }
            }
        }
        true
    }

    /// Cancel the execution for `id`, if any.
    pub fn cancel(&mut self, id: &str) -> CancelOutcome {
        if let Some(active) = self.active.get(id) {
            info!(item = %id, "cancelling in-flight execution");
            active.cancel.cancel();
            return CancelOutcome::InFlight;
        }

        if let Some(pos) = self.queued.iter().position(|q| q.id == id) {
            let queued = match self.queued.remove(pos) {
                Some(q) => q,
                None => return CancelOutcome::NotFound,
            };
            debug!(item = %id, "removed queued execution before it started");
            let _ = self.events.send(EngineEvent::ExecSettled(Settlement {
                id: queued.id,
                state_key: queued.state_key,
                outcome: ExecOutcome::Canceled,
            }));
            return CancelOutcome::Dequeued;
        }

        CancelOutcome::NotFound
    }

    /// Cancel everything: in-flight executions via the shared token, queued
    /// executions via synthetic settlements.
    pub fn cancel_all(&mut self) {
        info!(
            active = self.active.len(),
            queued = self.queued.len(),
            "cancelling all executions"
        );
        self.shutdown.cancel();
        while let Some(queued) = self.queued.pop_front() {
            let _ = self.events.send(EngineEvent::ExecSettled(Settlement {
                id: queued.id,
                state_key: queued.state_key,
                outcome: ExecOutcome::Canceled,
            }));
        }
    }

    /// Settlement hook: drop the execution from the active set and admit the
    /// next queued execution(s), preserving FIFO order.
    pub fn on_settled(&mut self, id: &str) {
        if let Some(active) = self.active.remove(id) {
            if matches!(active.class, ExecClass::Worker) {
                self.active_workers = self.active_workers.saturating_sub(1);
            }
        }

        while self.has_capacity() {
            let Some(queued) = self.queued.pop_front() else {
                break;
            };
            debug!(item = %queued.id, "admitting queued execution");
            self.spawn(queued.id, queued.state_key, ExecClass::Worker, queued.factory);
        }
    }

    /// True if an execution for `id` is in flight (not merely queued).
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// True if an execution for `id` is in flight or queued.
    pub fn is_tracked(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.queued.iter().any(|q| q.id == id)
    }

    /// Number of in-flight executions (workers and background).
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    fn has_capacity(&self) -> bool {
        self.worker_limit == 0 || self.active_workers < self.worker_limit
    }

    fn spawn(&mut self, id: ItemId, state_key: StateKey, class: ExecClass, factory: ExecFactory) {
        let cancel = self.shutdown.child_token();
        let events = self.events.clone();
        let exec_token = cancel.clone();
        let exec_id = id.clone();
        let exec_key = state_key.clone();

        let handle = tokio::spawn(async move {
            let _ = events.send(EngineEvent::ExecStarted {
                id: exec_id.clone(),
                state_key: exec_key.clone(),
            });

            let outcome = factory(exec_token).await;
            debug!(item = %exec_id, ?outcome, "execution settled");

            let _ = events.send(EngineEvent::ExecSettled(Settlement {
                id: exec_id,
                state_key: exec_key,
                outcome,
            }));
        });

        if matches!(class, ExecClass::Worker) {
            self.active_workers += 1;
        }
        self.active.insert(
            id,
            ActiveExecution {
                class,
                cancel,
                handle,
            },
        );
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        // Executions hold their own kill-on-drop children; aborting the
        // wrapper tasks is enough to avoid leaks if the engine is dropped
        // without a clean shutdown.
        for (_, active) in self.active.drain() {
            active.handle.abort();
        }
    }
}
