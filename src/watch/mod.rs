// src/watch/mod.rs

//! File watching and change-driven invalidation.
//!
//! This module is responsible for:
//! - Compiling each item's `src` list into watchable roots + glob matchers.
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//! - Coalescing event bursts through a debounce window.
//!
//! It does **not** decide whether a change is real: the engine recomputes
//! the item's fingerprint when a `SourceChanged` event arrives and only
//! resets the item when the fingerprint actually differs.

pub mod debounce;
pub mod patterns;
pub mod watcher;

pub use debounce::{spawn_debouncer, DEBOUNCE_WINDOW};
pub use patterns::{build_profiles, ItemWatchProfile};
pub use watcher::{spawn_watcher, WatcherHandle};
