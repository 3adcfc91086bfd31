// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the state store (single source of truth)
//! - the work graph and fingerprint resolver
//! - the process manager and the runtime backend
//! - watch-mode invalidations and shutdown signals
//!
//! The pure scheduling decisions live in [`evaluate`]; the async/IO shell
//! that owns all mutable state and reacts to events is [`driver`].

use crate::dag::item::{ItemId, StateKey};
use crate::exec::ExecOutcome;

/// Settled result of one execution, tagged with the fingerprint of the run
/// it belonged to so stale results can be rejected.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub id: ItemId,
    pub state_key: StateKey,
    pub outcome: ExecOutcome,
}

/// Events flowing into the engine loop from executions, the runtime, the
/// watch controller and the signal handler.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An execution left the queue and actually started.
    ExecStarted { id: ItemId, state_key: StateKey },
    /// An execution settled (success, failure, timeout or cancellation).
    ExecSettled(Settlement),
    /// The runtime reports a service as accepting traffic.
    ServiceReady {
        id: ItemId,
        state_key: StateKey,
        endpoint: String,
    },
    /// The watch controller saw a (debounced) change under an item's
    /// sources.
    SourceChanged { id: ItemId },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    Shutdown,
}

/// Engine behaviour options.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Watch mode: contain failures to the affected subtree and keep
    /// running; outside watch mode any crash/error cancels the whole run.
    pub watch: bool,
    /// Keep services running even when nothing needs them (the `up`
    /// subcommand); teardown only happens on shutdown.
    pub keep_services: bool,
}

pub mod driver;
pub mod evaluate;

pub use driver::{ItemReport, Orchestrator, RunReport};
pub use evaluate::{evaluate, Effect};
