// src/fingerprint/mod.rs

//! Fingerprints ("state keys") and the persisted cache.
//!
//! - [`resolver`] computes deterministic, order-insensitive fingerprints and
//!   decides whether a work item can be skipped.
//! - [`cache`] persists one JSON record per item id under a per-user cache
//!   root and backs the `clean` / `store` / `restore` subcommands.

pub mod cache;
pub mod resolver;

pub use cache::{CacheRecord, CacheStore, ExecSnapshot, FileStat};
pub use resolver::{CacheState, Fingerprint, FingerprintResolver};
