// src/config/mod.rs

//! Build file loading and validation.
//!
//! - [`model`] maps the TOML build file into typed structs.
//! - [`loader`] reads the root file, resolves `include` chains and applies
//!   `extends` inheritance.
//! - [`validate`] checks references and (for the `validate` subcommand)
//!   acyclicity.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_build_file_path, load_and_validate, load_from_path};
pub use model::{
    BuildFile, ConfigSection, DefaultSection, RawBuildFile, RawSrc, ServiceConfig, ServiceEntry,
    TaskConfig, TaskEntry,
};
pub use validate::check_acyclic;
