// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::CacheMode;

/// Command-line arguments for `workdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workdag",
    version,
    about = "Orchestrate build tasks and long-running services from a declarative graph.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the build file (TOML).
    ///
    /// Default: `Workdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Workdag.toml")]
    pub file: String,

    /// Maximum number of concurrently executing tasks (0 = unbounded).
    ///
    /// Overrides `[config].workers` from the build file. Services never
    /// count against this limit.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Keep running and re-execute work when source files change.
    #[arg(long)]
    pub watch: bool,

    /// Cache mode (checksum, modify-date, none).
    ///
    /// Overrides `[config].cache_mode` from the build file.
    #[arg(long, value_enum, value_name = "MODE")]
    pub cache_mode: Option<CacheMode>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute a named task together with its deps and needs.
    Exec {
        /// Name of the task to execute.
        task: String,
    },
    /// Bring every service (and the tasks they depend on) up and keep them
    /// running until interrupted.
    Up,
    /// Stop services left running by a previous invocation.
    Down,
    /// Delete every persisted cache record.
    Clean,
    /// Export the cache to a directory.
    Store {
        /// Target directory.
        path: PathBuf,
    },
    /// Import a previously exported cache from a directory.
    Restore {
        /// Source directory.
        path: PathBuf,
    },
    /// Parse the build file and report reference or cycle problems.
    Validate,
    /// List the planned work items without executing anything.
    Ls,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
