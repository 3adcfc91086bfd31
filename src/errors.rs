// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkdagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("dependency cycle: {0}")]
    Cycle(String),

    #[error("unknown work item: {0}")]
    UnknownItem(String),

    #[error("cache read error: {0}")]
    CacheRead(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("needed service ended: {0}")]
    ServiceEnded(String),

    #[error("canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkdagError>;
