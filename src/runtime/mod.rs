// src/runtime/mod.rs

//! Pluggable execution backends.
//!
//! The engine talks to a [`Runtime`] instead of spawning processes directly.
//! This crate ships [`local::LocalRuntime`] (shell processes); container and
//! pod backends implement the same trait out of tree. Tests substitute a
//! fake runtime that never touches the OS.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dag::item::{StateKey, WorkItem};
use crate::errors::Result;
use crate::exec::ExecFuture;
use crate::state::model::Snapshot;

pub mod local;

pub use local::LocalRuntime;

/// Context handed to one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Fingerprint of the run this attempt belongs to; settlements carry it
    /// so stale results are rejected.
    pub state_key: StateKey,
    /// Cancellation token for this attempt. The execution must observe it at
    /// every blocking step and resolve to a canceled outcome when it fires.
    pub cancel: CancellationToken,
}

/// An execution backend.
pub trait Runtime: Send + Sync {
    /// Reconcile pre-existing external resources at startup (e.g. containers
    /// or processes left over from a previous orchestrator run).
    fn initialize(&self, snapshot: &Snapshot) -> Result<()>;

    /// Perform the work for one item. The returned future settles with the
    /// execution outcome; long-running services additionally report
    /// readiness through the engine event channel they were built with.
    fn execute(&self, item: Arc<WorkItem>, ctx: ExecContext) -> ExecFuture;

    /// Best-effort stop of an externally-running resource for this item
    /// (used by `down` for resources not owned by this process). Errors are
    /// logged, never propagated.
    fn stop(&self, item: &WorkItem);

    /// Delete external resources generated for this item (volumes,
    /// containers, generated paths).
    fn remove(&self, item: &WorkItem) -> Result<()>;

    /// Import previously archived outputs for this item from `path`.
    fn restore(&self, item: &WorkItem, path: &Path) -> Result<()>;

    /// Export this item's outputs to `path`.
    fn archive(&self, item: &WorkItem, path: &Path) -> Result<()>;

    /// The state key of an already-running external resource carrying this
    /// item's identity, if one exists (used during [`Runtime::initialize`]).
    fn current_state_key(&self, item: &WorkItem) -> Option<StateKey>;
}
