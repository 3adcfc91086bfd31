#![allow(dead_code)]

use std::collections::BTreeMap;

use workdag::config::{
    BuildFile, ConfigSection, DefaultSection, RawSrc, ServiceConfig, ServiceEntry, TaskConfig,
    TaskEntry,
};
use workdag::config::validate::validate_build_file;

/// Origin label used for every builder-made entry; item ids become
/// `Workdag.toml:<name>` just like a plain single-file project.
pub const TEST_ORIGIN: &str = "Workdag.toml";

/// Builder for `BuildFile` to simplify test setup.
pub struct BuildFileBuilder {
    config: ConfigSection,
    default: DefaultSection,
    tasks: BTreeMap<String, TaskEntry>,
    services: BTreeMap<String, ServiceEntry>,
}

impl BuildFileBuilder {
    pub fn new() -> Self {
        Self {
            config: ConfigSection::default(),
            default: DefaultSection::default(),
            tasks: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.tasks.insert(
            name.to_string(),
            TaskEntry {
                origin: TEST_ORIGIN.to_string(),
                cfg: task,
            },
        );
        self
    }

    pub fn with_service(mut self, name: &str, service: ServiceConfig) -> Self {
        self.services.insert(
            name.to_string(),
            ServiceEntry {
                origin: TEST_ORIGIN.to_string(),
                cfg: service,
            },
        );
        self
    }

    pub fn with_default_src(mut self, pattern: &str) -> Self {
        self.default.src.push(RawSrc::Pattern(pattern.to_string()));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn build(self) -> BuildFile {
        let build =
            BuildFile::new_unchecked(self.config, self.default, self.tasks, self.services);
        validate_build_file(&build).expect("Failed to build valid build file from builder");
        build
    }
}

impl Default for BuildFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &[&str]) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                ..TaskConfig::default()
            },
        }
    }

    pub fn dep(mut self, name: &str) -> Self {
        self.task.deps.push(name.to_string());
        self
    }

    pub fn need(mut self, name: &str) -> Self {
        self.task.needs.push(name.to_string());
        self
    }

    pub fn src(mut self, pattern: &str) -> Self {
        self.task.src.push(RawSrc::Pattern(pattern.to_string()));
        self
    }

    pub fn generates(mut self, path: &str) -> Self {
        self.task.generates.push(path.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.task.image = Some(image.to_string());
        self
    }

    pub fn mount(mut self, mount: &str) -> Self {
        self.task.mounts.push(mount.to_string());
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.task.description = Some(text.to_string());
        self
    }

    pub fn timeout(mut self, duration: &str) -> Self {
        self.task.timeout = Some(duration.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Builder for `ServiceConfig`.
pub struct ServiceConfigBuilder {
    service: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new(cmd: &[&str]) -> Self {
        Self {
            service: ServiceConfig {
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                ..ServiceConfig::default()
            },
        }
    }

    pub fn dep(mut self, name: &str) -> Self {
        self.service.deps.push(name.to_string());
        self
    }

    pub fn need(mut self, name: &str) -> Self {
        self.service.needs.push(name.to_string());
        self
    }

    pub fn src(mut self, pattern: &str) -> Self {
        self.service.src.push(RawSrc::Pattern(pattern.to_string()));
        self
    }

    pub fn ready_on_stdout(mut self, pattern: &str) -> Self {
        self.service.ready_on_stdout = Some(pattern.to_string());
        self
    }

    pub fn ready_after(mut self, duration: &str) -> Self {
        self.service.ready_after = Some(duration.to_string());
        self
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.service.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.service
    }
}

/// Shorthand for the id a builder-made item gets.
pub fn test_id(name: &str) -> String {
    format!("{}:{}", TEST_ORIGIN, name)
}
