// src/dag/item.rs

//! Work item types: the planned, immutable description of a task or service.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Canonical item identity: `<origin file>:<name>`. Stable across runs.
pub type ItemId = String;

/// Fingerprint ("state key") type used to validate state patches.
pub type StateKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Task,
    Service,
}

/// A source path + matcher pair.
///
/// `path` is relative to the project root; `matches` are glob patterns
/// evaluated relative to `path`. An empty `matches` list means "everything
/// under `path`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcSpec {
    pub path: PathBuf,
    pub matches: Vec<String>,
}

/// Execution descriptor. Opaque to the scheduler; the runtime backend
/// interprets it. `image` and `mounts` only matter to container/pod
/// runtimes; the local runtime logs and ignores them.
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub image: Option<String>,
    pub mounts: Vec<String>,
    pub env: BTreeMap<String, String>,

    /// Regex matched against stdout lines; the first match marks a service
    /// ready. Ignored for tasks.
    pub ready_on_stdout: Option<String>,
    /// Fixed delay after which a service counts as ready. Ignored for tasks.
    pub ready_after: Option<Duration>,
    /// Endpoint reported once a service is running.
    pub endpoint: Option<String>,
    /// Execution timeout for tasks. A timeout is treated as a failure.
    pub timeout: Option<Duration>,
}

/// A planned task or service. Immutable after planning; only the associated
/// state in the state store changes over the course of a run.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    /// Cosmetic only; never part of the fingerprint.
    pub description: Option<String>,
    /// Tasks that must reach terminal success before this item may start.
    pub deps: Vec<ItemId>,
    /// Services that must be running before this item may start.
    pub needs: Vec<ItemId>,
    pub src: Vec<SrcSpec>,
    pub generates: Vec<PathBuf>,
    pub exec: ExecSpec,
}

impl WorkItem {
    pub fn is_task(&self) -> bool {
        matches!(self.kind, ItemKind::Task)
    }

    pub fn is_service(&self) -> bool {
        matches!(self.kind, ItemKind::Service)
    }

    /// Dependency *names* (the last `:`-separated segment of each dep id),
    /// as hashed into the fingerprint.
    pub fn dep_names(&self) -> Vec<&str> {
        self.deps
            .iter()
            .map(|id| id.rsplit(':').next().unwrap_or(id.as_str()))
            .collect()
    }
}
