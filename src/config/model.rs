// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::CacheMode;

/// Top-level build file as read from TOML.
///
/// ```toml
/// include = ["services.toml"]
///
/// [config]
/// workers = 4
/// cache_mode = "checksum"
///
/// [default]
/// src = ["src/**/*.rs"]
///
/// [task.build]
/// cmd = ["cargo", "build"]
/// deps = ["codegen"]
/// needs = ["db"]
/// generates = ["target/debug/app"]
///
/// [service.db]
/// cmd = ["postgres", "-D", "data"]
/// ready_on_stdout = "ready to accept connections"
/// endpoint = "localhost:5432"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBuildFile {
    /// Other build files to merge into this one, relative to this file.
    #[serde(default)]
    pub include: Vec<String>,

    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Defaults applied to items that do not override them, from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,

    /// All services from `[service.<name>]`, keyed by service name.
    #[serde(default)]
    pub service: BTreeMap<String, ServiceConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of concurrently executing tasks; 0 means unbounded.
    /// Services never count against this limit.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Default cache mode; overridable per invocation via `--cache-mode`.
    #[serde(default)]
    pub cache_mode: CacheMode,
}

fn default_workers() -> usize {
    4
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cache_mode: CacheMode::default(),
        }
    }
}

/// `[default]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    /// Default `src` matchers applied to items that do not define their own.
    #[serde(default)]
    pub src: Vec<RawSrc>,
}

/// A source specification in a build file.
///
/// Either a bare glob string (rooted at the project root):
///
/// ```toml
/// src = ["src/**/*.rs"]
/// ```
///
/// or a path + matcher pair:
///
/// ```toml
/// src = [{ path = "proto", matches = ["**/*.proto"] }]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSrc {
    Pattern(String),
    Rooted {
        path: String,
        #[serde(default)]
        matches: Vec<String>,
    },
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskConfig {
    /// Human-readable description. Cosmetic only: it never affects the
    /// task's fingerprint.
    #[serde(default)]
    pub description: Option<String>,

    /// The command to execute, as an argv list.
    #[serde(default)]
    pub cmd: Vec<String>,

    /// Tasks that must complete successfully before this one may start.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Services that must be running while this task executes.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Source matchers feeding the fingerprint and watch mode.
    /// If empty, `default.src` applies.
    #[serde(default)]
    pub src: Vec<RawSrc>,

    /// Paths this task produces.
    #[serde(default)]
    pub generates: Vec<String>,

    /// Environment entries for the execution.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Image for container/pod runtimes; opaque to the scheduler.
    #[serde(default)]
    pub image: Option<String>,

    /// Mounts for container/pod runtimes; opaque to the scheduler.
    #[serde(default)]
    pub mounts: Vec<String>,

    /// Name of another task whose unset fields this one inherits.
    #[serde(default)]
    pub extends: Option<String>,

    /// Execution timeout, e.g. `"30s"`. A timeout is treated as a failure.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// `[service.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    /// Human-readable description. Cosmetic only.
    #[serde(default)]
    pub description: Option<String>,

    /// The command to execute, as an argv list.
    #[serde(default)]
    pub cmd: Vec<String>,

    /// Tasks that must complete successfully before this service may start.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Other services that must be running before this one starts.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Source matchers feeding the fingerprint and watch mode.
    #[serde(default)]
    pub src: Vec<RawSrc>,

    /// Environment entries for the execution.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Image for container/pod runtimes; opaque to the scheduler.
    #[serde(default)]
    pub image: Option<String>,

    /// Mounts for container/pod runtimes; opaque to the scheduler.
    #[serde(default)]
    pub mounts: Vec<String>,

    /// Name of another service whose unset fields this one inherits.
    #[serde(default)]
    pub extends: Option<String>,

    /// Regex matched against the service's stdout; the first matching line
    /// marks the service as ready.
    #[serde(default)]
    pub ready_on_stdout: Option<String>,

    /// Duration string (e.g. `"2s"`) after which the service counts as ready
    /// regardless of its output.
    #[serde(default)]
    pub ready_after: Option<String>,

    /// Network endpoint dependents should use once the service is running.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// A task entry together with the (relative) path of the file that defined it.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub origin: String,
    pub cfg: TaskConfig,
}

/// A service entry together with the (relative) path of the file that defined it.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub origin: String,
    pub cfg: ServiceConfig,
}

/// Fully loaded and validated build file: the root file plus all includes,
/// with `extends` chains already applied.
#[derive(Debug, Clone)]
pub struct BuildFile {
    pub config: ConfigSection,
    pub default: DefaultSection,
    pub tasks: BTreeMap<String, TaskEntry>,
    pub services: BTreeMap<String, ServiceEntry>,
}

impl BuildFile {
    /// Construct without validation. Prefer [`crate::config::load_and_validate`].
    pub fn new_unchecked(
        config: ConfigSection,
        default: DefaultSection,
        tasks: BTreeMap<String, TaskEntry>,
        services: BTreeMap<String, ServiceEntry>,
    ) -> Self {
        Self {
            config,
            default,
            tasks,
            services,
        }
    }

    /// True if `name` refers to a task or service in this build file.
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name) || self.services.contains_key(name)
    }
}
