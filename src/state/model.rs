// src/state/model.rs

//! Lifecycle state types for tasks and services.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::dag::item::{ItemId, StateKey};

/// Task lifecycle phase.
///
/// `Pending → Starting → Ready → Running → {Completed | Crashed | Error |
/// Canceled}`. Terminal states may be reset back to `Pending` in watch mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPhase {
    /// Waiting on deps/needs, or not yet considered.
    Pending,
    /// Picked up by the scheduler; fingerprint being resolved.
    Starting,
    /// Fingerprint known; handed to the process manager (possibly queued
    /// behind the worker limit).
    Ready,
    /// Execution in flight.
    Running,
    Completed {
        cached: bool,
        duration: Duration,
    },
    Crashed {
        exit_code: i32,
    },
    Error {
        message: String,
    },
    Canceled,
}

/// Why a service stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The process exited on its own while still needed.
    Crashed,
    /// The orchestrator tore it down because nothing needed it anymore.
    Terminated,
}

/// Service lifecycle phase.
///
/// `Pending → Starting → Ready → Running → {Ended | Error | Canceled}`.
/// `Ready` means "process launched"; `Running` means "accepting traffic".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePhase {
    Pending,
    Starting,
    Ready,
    Running {
        endpoint: String,
    },
    Ended {
        reason: EndReason,
    },
    Error {
        message: String,
    },
    Canceled,
}

/// Stored task state: phase plus the fingerprint of the run it belongs to.
/// The key is installed at the `Ready` transition and cleared on reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub phase: TaskPhase,
    pub state_key: Option<StateKey>,
}

impl TaskState {
    pub fn pending() -> Self {
        Self {
            phase: TaskPhase::Pending,
            state_key: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            TaskPhase::Completed { .. }
                | TaskPhase::Crashed { .. }
                | TaskPhase::Error { .. }
                | TaskPhase::Canceled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.phase, TaskPhase::Completed { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.phase,
            TaskPhase::Crashed { .. } | TaskPhase::Error { .. } | TaskPhase::Canceled
        )
    }
}

/// Stored service state: phase plus the fingerprint of the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub phase: ServicePhase,
    pub state_key: Option<StateKey>,
}

impl ServiceState {
    pub fn pending() -> Self {
        Self {
            phase: ServicePhase::Pending,
            state_key: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            ServicePhase::Ended { .. } | ServicePhase::Error { .. } | ServicePhase::Canceled
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, ServicePhase::Running { .. })
    }
}

/// Full state of one orchestrator run: every scheduled item's current state.
///
/// `BTreeMap` keeps iteration deterministic, which in turn keeps the
/// scheduler's effect ordering deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub tasks: BTreeMap<ItemId, TaskState>,
    pub services: BTreeMap<ItemId, ServiceState>,
}

impl Snapshot {
    /// True once every scheduled item is in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.is_terminal())
            && self.services.values().all(|s| s.is_terminal())
    }

    /// True if every scheduled task completed (cached or fresh).
    pub fn all_tasks_succeeded(&self) -> bool {
        self.tasks.values().all(|t| t.is_success())
    }

    /// The stored state key for an item of either kind.
    pub fn state_key_of(&self, id: &str) -> Option<&StateKey> {
        self.tasks
            .get(id)
            .and_then(|t| t.state_key.as_ref())
            .or_else(|| self.services.get(id).and_then(|s| s.state_key.as_ref()))
    }

    /// True if the item (task or service) is in a non-terminal state.
    pub fn is_active(&self, id: &str) -> bool {
        if let Some(t) = self.tasks.get(id) {
            return !t.is_terminal();
        }
        if let Some(s) = self.services.get(id) {
            return !s.is_terminal();
        }
        false
    }
}

/// Short human-readable label for a task phase, used in summaries and logs.
pub fn task_phase_label(phase: &TaskPhase) -> &'static str {
    match phase {
        TaskPhase::Pending => "pending",
        TaskPhase::Starting => "starting",
        TaskPhase::Ready => "ready",
        TaskPhase::Running => "running",
        TaskPhase::Completed { cached: true, .. } => "completed (cached)",
        TaskPhase::Completed { cached: false, .. } => "completed",
        TaskPhase::Crashed { .. } => "crashed",
        TaskPhase::Error { .. } => "error",
        TaskPhase::Canceled => "canceled",
    }
}

/// Short human-readable label for a service phase.
pub fn service_phase_label(phase: &ServicePhase) -> &'static str {
    match phase {
        ServicePhase::Pending => "pending",
        ServicePhase::Starting => "starting",
        ServicePhase::Ready => "ready",
        ServicePhase::Running { .. } => "running",
        ServicePhase::Ended {
            reason: EndReason::Crashed,
        } => "ended (crashed)",
        ServicePhase::Ended {
            reason: EndReason::Terminated,
        } => "ended (terminated)",
        ServicePhase::Error { .. } => "error",
        ServicePhase::Canceled => "canceled",
    }
}
