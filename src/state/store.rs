// src/state/store.rs

//! The state store: single source of truth for every item's lifecycle state.
//!
//! All mutations go through [`StateStore::patch_task`] /
//! [`StateStore::patch_service`] / [`StateStore::reset_node`], which are only
//! ever called from the engine's event loop, so no two mutations interleave
//! and observers always see a consistent snapshot.

use tracing::{debug, warn};

use crate::dag::item::ItemId;
use crate::state::model::{
    service_phase_label, task_phase_label, ServicePhase, ServiceState, Snapshot, TaskPhase,
    TaskState,
};

/// Observer invoked synchronously after every successful mutation, with the
/// full current snapshot.
pub type Observer = Box<dyn Fn(&Snapshot) + Send>;

pub struct StateStore {
    snapshot: Snapshot,
    observers: Vec<Observer>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("snapshot", &self.snapshot)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl StateStore {
    /// Create a store with every listed item in `Pending`.
    pub fn new(tasks: impl IntoIterator<Item = ItemId>, services: impl IntoIterator<Item = ItemId>) -> Self {
        let mut snapshot = Snapshot::default();
        for id in tasks {
            snapshot.tasks.insert(id, TaskState::pending());
        }
        for id in services {
            snapshot.services.insert(id, ServiceState::pending());
        }
        Self {
            snapshot,
            observers: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Register an observer. Observers run synchronously, in registration
    /// order, after each successful patch.
    pub fn subscribe(&mut self, observer: impl Fn(&Snapshot) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Apply a task transition.
    ///
    /// The patch is applied only if the stored state key matches
    /// `state_key`, or the item has no stored key yet. On success, the
    /// patch's key (if any) becomes the stored key — this is how the
    /// `Ready` transition installs the fingerprint for the run. Stale
    /// patches from a superseded execution carry an old key and are
    /// dropped.
    pub fn patch_task(&mut self, id: &str, phase: TaskPhase, state_key: Option<&str>) -> bool {
        let Some(current) = self.snapshot.tasks.get(id) else {
            warn!(item = %id, "patch for unknown task; ignoring");
            return false;
        };

        if let (Some(stored), Some(incoming)) = (current.state_key.as_deref(), state_key) {
            if stored != incoming {
                debug!(
                    item = %id,
                    stored_key = %stored,
                    patch_key = %incoming,
                    "rejecting stale task patch"
                );
                return false;
            }
        }

        debug!(
            item = %id,
            from = task_phase_label(&current.phase),
            to = task_phase_label(&phase),
            "task state transition"
        );

        let key = state_key
            .map(|k| k.to_string())
            .or_else(|| current.state_key.clone());
        self.snapshot.tasks.insert(
            id.to_string(),
            TaskState {
                phase,
                state_key: key,
            },
        );
        self.notify();
        true
    }

    /// Apply a service transition. Same key discipline as [`Self::patch_task`].
    pub fn patch_service(&mut self, id: &str, phase: ServicePhase, state_key: Option<&str>) -> bool {
        let Some(current) = self.snapshot.services.get(id) else {
            warn!(item = %id, "patch for unknown service; ignoring");
            return false;
        };

        if let (Some(stored), Some(incoming)) = (current.state_key.as_deref(), state_key) {
            if stored != incoming {
                debug!(
                    item = %id,
                    stored_key = %stored,
                    patch_key = %incoming,
                    "rejecting stale service patch"
                );
                return false;
            }
        }

        debug!(
            item = %id,
            from = service_phase_label(&current.phase),
            to = service_phase_label(&phase),
            "service state transition"
        );

        let key = state_key
            .map(|k| k.to_string())
            .or_else(|| current.state_key.clone());
        self.snapshot.services.insert(
            id.to_string(),
            ServiceState {
                phase,
                state_key: key,
            },
        );
        self.notify();
        true
    }

    /// Force a terminal item back to `Pending`, clearing its state key so the
    /// next run installs a fresh fingerprint.
    ///
    /// The caller (the engine) is responsible for first canceling and
    /// awaiting any in-flight execution; resetting a non-terminal item is
    /// refused so two executions can never share a workspace.
    pub fn reset_node(&mut self, id: &str) -> bool {
        if let Some(task) = self.snapshot.tasks.get(id) {
            if !task.is_terminal() {
                warn!(item = %id, "refusing to reset non-terminal task");
                return false;
            }
            debug!(item = %id, "resetting task to pending");
            self.snapshot
                .tasks
                .insert(id.to_string(), TaskState::pending());
            self.notify();
            return true;
        }

        if let Some(service) = self.snapshot.services.get(id) {
            if !service.is_terminal() {
                warn!(item = %id, "refusing to reset non-terminal service");
                return false;
            }
            debug!(item = %id, "resetting service to pending");
            self.snapshot
                .services
                .insert(id.to_string(), ServiceState::pending());
            self.notify();
            return true;
        }

        warn!(item = %id, "reset for unknown item; ignoring");
        false
    }

    fn notify(&self) {
        for observer in &self.observers {
            observer(&self.snapshot);
        }
    }
}
