// src/dag/plan.rs

//! Planning: turn a loaded build file into a closed [`WorkGraph`].
//!
//! Construction is two-pass: first every entry is registered in the arena
//! under its id, then `deps`/`needs` names are resolved to ids by lookup.
//! This avoids ordering problems when items reference each other across
//! included files.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tracing::debug;

use crate::config::model::{BuildFile, RawSrc};
use crate::dag::graph::WorkGraph;
use crate::dag::item::{ExecSpec, ItemId, ItemKind, SrcSpec, WorkItem};
use crate::errors::{Result, WorkdagError};
use crate::types::parse_duration;

/// Resolve a build file into a graph of work items.
///
/// Item ids are `<origin file>:<name>`, so identities stay stable across
/// runs and across include reshuffles. Cycles are *not* rejected here; the
/// engine runs [`crate::dag::cycles::detect_cycles`] on the result and
/// converts members into terminal error states.
pub fn plan_graph(build: &BuildFile) -> Result<WorkGraph> {
    // Pass 1: register ids for every entry.
    let mut ids: HashMap<String, ItemId> = HashMap::new();
    for (name, entry) in build.tasks.iter() {
        ids.insert(name.clone(), format!("{}:{}", entry.origin, name));
    }
    for (name, entry) in build.services.iter() {
        ids.insert(name.clone(), format!("{}:{}", entry.origin, name));
    }

    let resolve = |names: &[String]| -> Result<Vec<ItemId>> {
        names
            .iter()
            .map(|n| {
                ids.get(n).cloned().ok_or_else(|| {
                    WorkdagError::UnknownItem(n.clone())
                })
            })
            .collect()
    };

    // Pass 2: materialize items with resolved edges.
    let mut items: Vec<WorkItem> = Vec::new();

    for (name, entry) in build.tasks.iter() {
        let cfg = &entry.cfg;
        let src = effective_src(&cfg.src, &build.default.src);
        let timeout = cfg
            .timeout
            .as_deref()
            .map(|s| {
                parse_duration(s).map_err(|e| {
                    WorkdagError::Config(format!("task '{}': invalid timeout: {}", name, e))
                })
            })
            .transpose()?;

        items.push(WorkItem {
            id: ids[name].clone(),
            name: name.clone(),
            kind: ItemKind::Task,
            description: cfg.description.clone(),
            deps: resolve(&cfg.deps)?,
            needs: resolve(&cfg.needs)?,
            src,
            generates: cfg.generates.iter().map(PathBuf::from).collect(),
            exec: ExecSpec {
                cmd: cfg.cmd.clone(),
                image: cfg.image.clone(),
                mounts: cfg.mounts.clone(),
                env: cfg.env.clone(),
                timeout,
                ..ExecSpec::default()
            },
        });
    }

    for (name, entry) in build.services.iter() {
        let cfg = &entry.cfg;
        let src = effective_src(&cfg.src, &build.default.src);
        let ready_after = cfg
            .ready_after
            .as_deref()
            .map(|s| {
                parse_duration(s).map_err(|e| {
                    WorkdagError::Config(format!("service '{}': invalid ready_after: {}", name, e))
                })
            })
            .transpose()?;

        items.push(WorkItem {
            id: ids[name].clone(),
            name: name.clone(),
            kind: ItemKind::Service,
            description: cfg.description.clone(),
            deps: resolve(&cfg.deps)?,
            needs: resolve(&cfg.needs)?,
            src,
            generates: Vec::new(),
            exec: ExecSpec {
                cmd: cfg.cmd.clone(),
                image: cfg.image.clone(),
                mounts: cfg.mounts.clone(),
                env: cfg.env.clone(),
                ready_on_stdout: cfg.ready_on_stdout.clone(),
                ready_after,
                endpoint: cfg.endpoint.clone(),
                ..ExecSpec::default()
            },
        });
    }

    debug!(items = items.len(), "planned work graph");
    Ok(WorkGraph::from_items(items))
}

/// Apply the `[default]` src list to items that define none of their own,
/// and normalise raw specs into path + matcher pairs.
fn effective_src(own: &[RawSrc], default: &[RawSrc]) -> Vec<SrcSpec> {
    let chosen = if own.is_empty() { default } else { own };
    chosen.iter().map(normalize_src).collect()
}

/// Normalise one raw source spec.
///
/// Bare patterns are split at the first glob component, so `"src/**/*.rs"`
/// becomes `path = "src", matches = ["**/*.rs"]` and the watcher can scope
/// its filesystem watch to the literal prefix.
fn normalize_src(raw: &RawSrc) -> SrcSpec {
    match raw {
        RawSrc::Rooted { path, matches } => SrcSpec {
            path: PathBuf::from(path),
            matches: matches.clone(),
        },
        RawSrc::Pattern(pattern) => {
            let mut prefix = PathBuf::new();
            let mut rest: Vec<String> = Vec::new();
            let mut in_glob = false;
            for part in pattern.split('/') {
                if in_glob || part.contains('*') || part.contains('?') || part.contains('[') {
                    in_glob = true;
                    rest.push(part.to_string());
                } else {
                    prefix.push(part);
                }
            }
            if rest.is_empty() {
                // A literal path: watch/hash it directly.
                SrcSpec {
                    path: prefix,
                    matches: Vec::new(),
                }
            } else {
                let path = if prefix.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    prefix
                };
                SrcSpec {
                    path,
                    matches: vec![rest.join("/")],
                }
            }
        }
    }
}

/// Item name → id mapping helper used by the CLI layer (`exec <task>`).
pub fn name_index(graph: &WorkGraph) -> BTreeMap<String, ItemId> {
    graph
        .items()
        .map(|item| (item.name.clone(), item.id.clone()))
        .collect()
}
