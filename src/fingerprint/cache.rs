// src/fingerprint/cache.rs

//! Persisted cache records: one JSON file per work item under a per-user
//! cache root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::item::{StateKey, WorkItem};
use crate::errors::{Result, WorkdagError};
use crate::fs::FileSystem;

/// Per-file stat captured at record time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
}

/// Snapshot of the execution descriptor at record time, so `ls`-style
/// tooling can show what a cached result was produced by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSnapshot {
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<String>,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub generates: Vec<String>,
}

impl ExecSnapshot {
    pub fn of(item: &WorkItem) -> Self {
        Self {
            cmd: item.exec.cmd.clone(),
            image: item.exec.image.clone(),
            mounts: item.exec.mounts.clone(),
            env: item.exec.env.clone(),
            generates: item
                .generates
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        }
    }
}

/// The record persisted after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub task: ExecSnapshot,
    pub state_key: StateKey,
    pub stats: BTreeMap<String, FileStat>,
}

/// Filesystem-backed store of [`CacheRecord`]s keyed by item id.
#[derive(Debug, Clone)]
pub struct CacheStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl CacheStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: PathBuf) -> Self {
        Self { fs, root }
    }

    /// Default per-user cache root: `<user cache dir>/workdag`.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("workdag")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the record for an item. A missing record is `Ok(None)`; a
    /// corrupt record is a [`WorkdagError::CacheRead`], which callers treat
    /// as a cache miss.
    pub fn load(&self, item_id: &str) -> Result<Option<CacheRecord>> {
        let path = self.record_path(item_id);
        if !self.fs.exists(&path) {
            return Ok(None);
        }

        let contents = self
            .fs
            .read_to_string(&path)
            .map_err(|e| WorkdagError::CacheRead(format!("{}: {}", path.display(), e)))?;
        let record: CacheRecord = serde_json::from_str(&contents)
            .map_err(|e| WorkdagError::CacheRead(format!("{}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    /// Persist the record for an item, replacing any previous one.
    pub fn save(&self, item_id: &str, record: &CacheRecord) -> Result<()> {
        let path = self.record_path(item_id);
        let contents = serde_json::to_vec_pretty(record)
            .map_err(|e| WorkdagError::CacheRead(format!("serializing record: {}", e)))?;
        self.fs.write(&path, &contents)?;
        debug!(item = %item_id, path = %path.display(), "stored cache record");
        Ok(())
    }

    /// Drop every record (the `clean` subcommand).
    pub fn clear(&self) -> Result<()> {
        if self.fs.exists(&self.root) {
            self.fs.remove(&self.root)?;
            info!(root = %self.root.display(), "cleared cache");
        }
        Ok(())
    }

    /// Copy all records to `path` (the `store` subcommand).
    pub fn export(&self, path: &Path) -> Result<()> {
        if !self.fs.exists(&self.root) {
            self.fs.create_dir(&self.root)?;
        }
        self.fs.copy(&self.root, path)?;
        info!(to = %path.display(), "exported cache");
        Ok(())
    }

    /// Copy records back from `path` (the `restore` subcommand).
    pub fn import(&self, path: &Path) -> Result<()> {
        self.fs.copy(path, &self.root)?;
        info!(from = %path.display(), "imported cache");
        Ok(())
    }

    /// Record path for an item: ids contain path separators, so the file
    /// name is the id's hash with a short readable suffix.
    fn record_path(&self, item_id: &str) -> PathBuf {
        let digest = blake3::hash(item_id.as_bytes()).to_hex();
        let name = item_id.rsplit(':').next().unwrap_or(item_id);
        self.root.join(format!("{}-{}.json", name, &digest[..16]))
    }
}
