use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use workdag::dag::{StateKey, WorkItem};
use workdag::engine::EngineEvent;
use workdag::errors::Result;
use workdag::exec::{ExecFuture, ExecOutcome};
use workdag::runtime::{ExecContext, Runtime};
use workdag::state::Snapshot;

/// A fake runtime that never touches the OS.
///
/// - Tasks complete instantly with success unless told to fail or hold.
/// - Services report readiness immediately and then stay alive until their
///   cancellation token fires.
/// - Every execution is recorded, and a concurrency high-water mark is kept
///   so tests can assert the worker limit.
pub struct FakeRuntime {
    events: mpsc::UnboundedSender<EngineEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    running: Arc<Mutex<HashSet<String>>>,
    max_concurrent_tasks: Arc<Mutex<usize>>,
    holds: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FakeRuntime {
    pub fn new(events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            events,
            executed: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent_tasks: Arc::new(Mutex::new(0)),
            holds: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Names (not ids) of items that were executed, in start order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Highest number of task executions observed in flight at once.
    pub fn max_concurrent_tasks(&self) -> usize {
        *self.max_concurrent_tasks.lock().unwrap()
    }

    /// Make the task with this *name* block until [`Self::release`] is
    /// called (or it is canceled).
    pub fn hold(&self, name: &str) {
        self.holds
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(Notify::new()));
    }

    /// Let a held task finish.
    pub fn release(&self, name: &str) {
        if let Some(notify) = self.holds.lock().unwrap().get(name) {
            notify.notify_one();
        }
    }

    /// Make the item with this *name* crash with exit code 1.
    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }
}

impl Runtime for FakeRuntime {
    fn initialize(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }

    fn execute(&self, item: Arc<WorkItem>, ctx: ExecContext) -> ExecFuture {
        let events = self.events.clone();
        let executed = self.executed.clone();
        let running = self.running.clone();
        let max_concurrent = self.max_concurrent_tasks.clone();
        let holds = self.holds.clone();
        let failing = self.failing.clone();

        Box::pin(async move {
            executed.lock().unwrap().push(item.name.clone());
            let should_fail = failing.lock().unwrap().contains(&item.name);

            if item.is_service() {
                if should_fail {
                    return ExecOutcome::Crashed {
                        exit_code: 1,
                        tail: vec!["service fell over".to_string()],
                    };
                }
                let endpoint = item
                    .exec
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string());
                let _ = events.send(EngineEvent::ServiceReady {
                    id: item.id.clone(),
                    state_key: ctx.state_key.clone(),
                    endpoint,
                });
                ctx.cancel.cancelled().await;
                return ExecOutcome::Canceled;
            }

            // Task: record concurrency, optionally hold, then settle.
            {
                let mut guard = running.lock().unwrap();
                guard.insert(item.name.clone());
                let mut max = max_concurrent.lock().unwrap();
                *max = (*max).max(guard.len());
            }

            let hold = holds.lock().unwrap().get(&item.name).cloned();
            let outcome = if let Some(notify) = hold {
                tokio::select! {
                    _ = notify.notified() => {
                        if should_fail {
                            ExecOutcome::Crashed { exit_code: 1, tail: Vec::new() }
                        } else {
                            ExecOutcome::Success { duration: Duration::from_millis(1) }
                        }
                    }
                    _ = ctx.cancel.cancelled() => ExecOutcome::Canceled,
                }
            } else {
                // Yield once so concurrently admitted tasks overlap.
                tokio::task::yield_now().await;
                if ctx.cancel.is_cancelled() {
                    ExecOutcome::Canceled
                } else if should_fail {
                    ExecOutcome::Crashed {
                        exit_code: 1,
                        tail: vec!["boom".to_string()],
                    }
                } else {
                    ExecOutcome::Success {
                        duration: Duration::from_millis(1),
                    }
                }
            };

            running.lock().unwrap().remove(&item.name);
            outcome
        })
    }

    fn stop(&self, _item: &WorkItem) {}

    fn remove(&self, _item: &WorkItem) -> Result<()> {
        Ok(())
    }

    fn restore(&self, _item: &WorkItem, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn archive(&self, _item: &WorkItem, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn current_state_key(&self, _item: &WorkItem) -> Option<StateKey> {
        None
    }
}
