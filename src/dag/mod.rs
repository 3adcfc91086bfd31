// src/dag/mod.rs

//! Work graph representation and planning.
//!
//! - [`item`] defines the immutable [`item::WorkItem`] and its execution
//!   descriptor.
//! - [`plan`] resolves a build file into a closed graph (arena keyed by id,
//!   edges linked in a second pass).
//! - [`graph`] holds adjacency plus the readiness queries the scheduler
//!   evaluates against a state snapshot.
//! - [`cycles`] detects deps/needs cycles with a path-tracking DFS.

pub mod cycles;
pub mod graph;
pub mod item;
pub mod plan;

pub use cycles::{cycle_members, detect_cycles, render_cycle, CyclePath};
pub use graph::WorkGraph;
pub use item::{ExecSpec, ItemId, ItemKind, SrcSpec, StateKey, WorkItem};
pub use plan::{name_index, plan_graph};
