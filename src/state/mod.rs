// src/state/mod.rs

//! State store and lifecycle state types.
//!
//! - [`model`] defines the tagged task/service state variants and the
//!   [`model::Snapshot`] the scheduler evaluates against.
//! - [`store`] holds the single mutable copy and notifies observers on
//!   every successful mutation.

pub mod model;
pub mod store;

pub use model::{
    EndReason, ServicePhase, ServiceState, Snapshot, TaskPhase, TaskState,
};
pub use store::StateStore;
