// src/exec/mod.rs

//! Process execution layer.
//!
//! [`manager`] owns the bounded-concurrency process manager: it admits
//! execution factories under the task worker limit, runs services in an
//! unbounded background class, guarantees one in-flight execution per item
//! id, and wires every execution to a cancellation token.
//!
//! The factories themselves come from the runtime backend (see
//! [`crate::runtime`]); the manager never interprets what an execution does.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub mod manager;

pub use manager::{CancelOutcome, ProcessManager};

/// Which admission class an execution belongs to.
///
/// Workers count against the configured limit; background executions
/// (services) are unbounded since they are long-lived and mostly idle from
/// the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecClass {
    Worker,
    Background,
}

/// Settled outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success {
        duration: Duration,
    },
    /// The external process exited non-zero. `tail` carries the last few
    /// captured output lines for the final report.
    Crashed {
        exit_code: i32,
        tail: Vec<String>,
    },
    /// Unexpected failure while executing (spawn error, pipe error, ...).
    Error {
        message: String,
    },
    /// The execution exceeded its configured timeout. Distinct from
    /// `Canceled`: a timeout counts as a failure.
    TimedOut,
    /// Cooperative cancellation; never reported as a failure of the item's
    /// own doing.
    Canceled,
}

impl ExecOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecOutcome::Crashed { .. } | ExecOutcome::Error { .. } | ExecOutcome::TimedOut
        )
    }
}

/// Future returned by an execution factory.
pub type ExecFuture = Pin<Box<dyn Future<Output = ExecOutcome> + Send>>;

/// An execution factory: given the cancellation token for this attempt,
/// produce the future that performs the work. The factory must observe the
/// token at every blocking step and resolve to [`ExecOutcome::Canceled`]
/// rather than erroring when it fires.
pub type ExecFactory = Box<dyn FnOnce(CancellationToken) -> ExecFuture + Send>;
