// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::dag::graph::WorkGraph;
use crate::dag::item::ItemId;

/// One compiled source root of a watch profile: the literal directory (or
/// file) to watch plus the matchers evaluated relative to it.
#[derive(Clone)]
struct CompiledSrc {
    root: PathBuf,
    matcher: Option<GlobSet>,
}

/// Compiled watch/matcher state for a single work item.
///
/// The watcher passes absolute changed paths into [`Self::matches`]; paths
/// are relativized against each source root before glob evaluation.
#[derive(Clone)]
pub struct ItemWatchProfile {
    id: ItemId,
    sources: Vec<CompiledSrc>,
}

impl fmt::Debug for ItemWatchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemWatchProfile")
            .field("id", &self.id)
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

impl ItemWatchProfile {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The literal directories/files this profile needs watched.
    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.sources.iter().map(|s| s.root.as_path())
    }

    /// True if this item is interested in the given (absolute) path.
    pub fn matches(&self, path: &Path) -> bool {
        for src in self.sources.iter() {
            if path == src.root {
                return true;
            }
            let Ok(rel) = path.strip_prefix(&src.root) else {
                continue;
            };
            match &src.matcher {
                None => return true,
                Some(set) => {
                    let rel_str = rel.to_string_lossy().replace('\\', "/");
                    if set.is_match(&rel_str) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Build a watch profile for every item with a non-empty `src` list.
pub fn build_profiles(graph: &WorkGraph, project_root: &Path) -> Result<Vec<ItemWatchProfile>> {
    let mut profiles = Vec::new();

    let mut ids: Vec<&ItemId> = graph.items().map(|i| &i.id).collect();
    ids.sort();

    for id in ids {
        let Some(item) = graph.item(id) else {
            continue;
        };
        if item.src.is_empty() {
            continue;
        }

        let mut sources = Vec::with_capacity(item.src.len());
        for spec in item.src.iter() {
            let root = project_root.join(&spec.path);
            let root = root.canonicalize().unwrap_or(root);
            let matcher = if spec.matches.is_empty() {
                None
            } else {
                Some(build_globset(&spec.matches).with_context(|| {
                    format!("building source matcher for item {}", item.id)
                })?)
            };
            sources.push(CompiledSrc { root, matcher });
        }

        profiles.push(ItemWatchProfile {
            id: item.id.clone(),
            sources,
        });
    }

    Ok(profiles)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
