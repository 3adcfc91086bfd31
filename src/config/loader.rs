// src/config/loader.rs

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{
    BuildFile, RawBuildFile, ServiceEntry, TaskEntry,
};
use crate::config::validate::validate_build_file;
use crate::errors::{Result, WorkdagError};

/// Load a single build file from a given path and return the raw
/// [`RawBuildFile`].
///
/// This only performs TOML deserialization; it does **not** resolve includes
/// or perform semantic validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawBuildFile> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;

    let raw: RawBuildFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a build file, resolve its `include` chain, apply `extends`, and run
/// validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML for the root file and every included file, recursively.
///   Each file is loaded at most once (tracked by canonical path), so a
///   file reachable through two different includes contributes its items
///   only once.
/// - Records each item's origin file so that item identities stay stable
///   across runs even when names repeat in unrelated projects.
/// - Applies `extends` inheritance.
/// - Checks references (`deps` name tasks, `needs` name services) and
///   name uniqueness across all loaded files.
///
/// Cycles in `deps`/`needs` are deliberately *not* rejected here: the
/// planner detects them and converts the members into terminal error
/// states so unrelated work still runs.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<BuildFile> {
    let path = path.as_ref();
    let root_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut tasks: BTreeMap<String, TaskEntry> = BTreeMap::new();
    let mut services: BTreeMap<String, ServiceEntry> = BTreeMap::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();

    let root_raw = load_file_tree(
        path,
        &root_dir,
        &mut tasks,
        &mut services,
        &mut visited,
    )?;

    let mut build = BuildFile::new_unchecked(root_raw.config, root_raw.default, tasks, services);
    apply_extends(&mut build)?;
    validate_build_file(&build)?;
    Ok(build)
}

/// Helper to resolve a default build file path (`Workdag.toml` in the
/// current working directory).
pub fn default_build_file_path() -> PathBuf {
    PathBuf::from("Workdag.toml")
}

/// Recursively load `path` and everything it includes, merging items into
/// the shared maps. Returns the raw root file so the caller can pick up its
/// `[config]` / `[default]` sections (included files contribute items only).
fn load_file_tree(
    path: &Path,
    root_dir: &Path,
    tasks: &mut BTreeMap<String, TaskEntry>,
    services: &mut BTreeMap<String, ServiceEntry>,
    visited: &mut HashSet<PathBuf>,
) -> Result<RawBuildFile> {
    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        debug!(?path, "build file already loaded; skipping include");
        return Ok(RawBuildFile::default());
    }

    let raw = load_from_path(path)?;
    let origin = origin_of(path, root_dir);

    for (name, cfg) in raw.task.iter() {
        if tasks.contains_key(name) || services.contains_key(name) {
            return Err(WorkdagError::Config(format!(
                "duplicate item name '{}' (defined again in {})",
                name, origin
            )));
        }
        tasks.insert(
            name.clone(),
            TaskEntry {
                origin: origin.clone(),
                cfg: cfg.clone(),
            },
        );
    }

    for (name, cfg) in raw.service.iter() {
        if tasks.contains_key(name) || services.contains_key(name) {
            return Err(WorkdagError::Config(format!(
                "duplicate item name '{}' (defined again in {})",
                name, origin
            )));
        }
        services.insert(
            name.clone(),
            ServiceEntry {
                origin: origin.clone(),
                cfg: cfg.clone(),
            },
        );
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    for include in raw.include.iter() {
        let include_path = parent.join(include);
        load_file_tree(&include_path, root_dir, tasks, services, visited)?;
    }

    Ok(raw)
}

/// Stable origin label for a build file: its path relative to the root
/// file's directory, with forward slashes.
fn origin_of(path: &Path, root_dir: &Path) -> String {
    let rel = path.strip_prefix(root_dir).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Resolve `extends` chains: an entry inherits every field it leaves unset
/// from the entry it extends. Chains are followed transitively; a chain that
/// loops back on itself is a configuration error.
fn apply_extends(build: &mut BuildFile) -> Result<()> {
    let task_names: Vec<String> = build.tasks.keys().cloned().collect();
    for name in task_names {
        let mut seen: Vec<String> = vec![name.clone()];
        let mut next = build.tasks.get(&name).and_then(|e| e.cfg.extends.clone());
        while let Some(parent) = next {
            if seen.contains(&parent) {
                return Err(WorkdagError::Config(format!(
                    "task '{}' has a circular extends chain through '{}'",
                    name, parent
                )));
            }
            let parent_cfg = build
                .tasks
                .get(&parent)
                .map(|e| e.cfg.clone())
                .ok_or_else(|| {
                    WorkdagError::Config(format!(
                        "task '{}' extends unknown task '{}'",
                        name, parent
                    ))
                })?;
            if let Some(entry) = build.tasks.get_mut(&name) {
                merge_task(&mut entry.cfg, &parent_cfg);
            }
            seen.push(parent);
            next = parent_cfg.extends.clone();
        }
    }

    let service_names: Vec<String> = build.services.keys().cloned().collect();
    for name in service_names {
        let mut seen: Vec<String> = vec![name.clone()];
        let mut next = build
            .services
            .get(&name)
            .and_then(|e| e.cfg.extends.clone());
        while let Some(parent) = next {
            if seen.contains(&parent) {
                return Err(WorkdagError::Config(format!(
                    "service '{}' has a circular extends chain through '{}'",
                    name, parent
                )));
            }
            let parent_cfg = build
                .services
                .get(&parent)
                .map(|e| e.cfg.clone())
                .ok_or_else(|| {
                    WorkdagError::Config(format!(
                        "service '{}' extends unknown service '{}'",
                        name, parent
                    ))
                })?;
            if let Some(entry) = build.services.get_mut(&name) {
                merge_service(&mut entry.cfg, &parent_cfg);
            }
            seen.push(parent);
            next = parent_cfg.extends.clone();
        }
    }

    Ok(())
}

fn merge_task(child: &mut crate::config::model::TaskConfig, parent: &crate::config::model::TaskConfig) {
    if child.cmd.is_empty() {
        child.cmd = parent.cmd.clone();
    }
    if child.deps.is_empty() {
        child.deps = parent.deps.clone();
    }
    if child.needs.is_empty() {
        child.needs = parent.needs.clone();
    }
    if child.src.is_empty() {
        child.src = parent.src.clone();
    }
    if child.generates.is_empty() {
        child.generates = parent.generates.clone();
    }
    if child.image.is_none() {
        child.image = parent.image.clone();
    }
    if child.mounts.is_empty() {
        child.mounts = parent.mounts.clone();
    }
    if child.timeout.is_none() {
        child.timeout = parent.timeout.clone();
    }
    for (k, v) in parent.env.iter() {
        child.env.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

fn merge_service(
    child: &mut crate::config::model::ServiceConfig,
    parent: &crate::config::model::ServiceConfig,
) {
    if child.cmd.is_empty() {
        child.cmd = parent.cmd.clone();
    }
    if child.deps.is_empty() {
        child.deps = parent.deps.clone();
    }
    if child.needs.is_empty() {
        child.needs = parent.needs.clone();
    }
    if child.src.is_empty() {
        child.src = parent.src.clone();
    }
    if child.image.is_none() {
        child.image = parent.image.clone();
    }
    if child.mounts.is_empty() {
        child.mounts = parent.mounts.clone();
    }
    if child.ready_on_stdout.is_none() {
        child.ready_on_stdout = parent.ready_on_stdout.clone();
    }
    if child.ready_after.is_none() {
        child.ready_after = parent.ready_after.clone();
    }
    if child.endpoint.is_none() {
        child.endpoint = parent.endpoint.clone();
    }
    for (k, v) in parent.env.iter() {
        child.env.entry(k.clone()).or_insert_with(|| v.clone());
    }
}
