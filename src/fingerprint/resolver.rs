// src/fingerprint/resolver.rs

//! Fingerprint computation and cache-state checks.
//!
//! The fingerprint (state key) is a blake3 hash over every input that should
//! invalidate a work item: source files, command list, image, mounts,
//! environment, dependency names and generated paths. Every multi-valued
//! input is sorted before hashing, so map/array ordering in the build file
//! never affects the key. Cosmetic fields (descriptions) are excluded.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use blake3::Hasher;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::dag::item::{SrcSpec, StateKey, WorkItem};
use crate::errors::Result;
use crate::fingerprint::cache::{CacheRecord, CacheStore, ExecSnapshot, FileStat};
use crate::fs::FileSystem;
use crate::types::CacheMode;

/// A computed fingerprint: the aggregate key plus the per-file stats that
/// went into it (persisted alongside the key in the cache record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub state_key: StateKey,
    pub stats: BTreeMap<String, FileStat>,
}

/// Result of a cache check before scheduling.
#[derive(Debug, Clone)]
pub struct CacheState {
    pub changed: bool,
    pub fingerprint: Fingerprint,
}

/// Computes fingerprints and answers "can this run be skipped".
///
/// Read-only after construction; all calls for one item happen from the
/// engine loop, so per-item computations never race.
#[derive(Debug, Clone)]
pub struct FingerprintResolver {
    fs: Arc<dyn FileSystem>,
    cache: CacheStore,
    mode: CacheMode,
    root: PathBuf,
}

impl FingerprintResolver {
    pub fn new(fs: Arc<dyn FileSystem>, cache: CacheStore, mode: CacheMode, root: PathBuf) -> Self {
        Self {
            fs,
            cache,
            mode,
            root,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Compute the current fingerprint for an item.
    pub fn compute(&self, item: &WorkItem) -> Result<Fingerprint> {
        let stats = self.collect_stats(item)?;

        let mut hasher = Hasher::new();

        hasher.update(b"src\0");
        for (path, stat) in stats.iter() {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            match self.mode {
                CacheMode::ModifyDate => {
                    hasher.update(stat.last_modified.to_string().as_bytes());
                }
                _ => {
                    if let Some(checksum) = &stat.checksum {
                        hasher.update(checksum.as_bytes());
                    }
                }
            }
            hasher.update(b"\n");
        }

        hash_sorted(&mut hasher, b"cmd\0", item.exec.cmd.iter());

        hasher.update(b"image\0");
        if let Some(image) = &item.exec.image {
            hasher.update(image.as_bytes());
        }
        hasher.update(b"\n");

        hash_sorted(&mut hasher, b"mounts\0", item.exec.mounts.iter());

        // BTreeMap iterates in key order already.
        hasher.update(b"env\0");
        for (k, v) in item.exec.env.iter() {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\n");
        }

        hash_sorted(&mut hasher, b"deps\0", item.dep_names().into_iter());
        hash_sorted(
            &mut hasher,
            b"generates\0",
            item.generates.iter().map(|p| p.to_string_lossy()),
        );

        let state_key = hasher.finalize().to_hex().to_string();
        debug!(item = %item.id, key = %state_key, "computed fingerprint");

        Ok(Fingerprint { state_key, stats })
    }

    /// Read the persisted record, recompute the current fingerprint, and
    /// report whether the item must run.
    ///
    /// Cache read failures degrade to a logged miss (`changed = true`); they
    /// never abort scheduling. With [`CacheMode::None`], caching is disabled
    /// and the result is always `changed = true`.
    pub fn check_cache_state(&self, item: &WorkItem) -> Result<CacheState> {
        let fingerprint = self.compute(item)?;

        if matches!(self.mode, CacheMode::None) {
            return Ok(CacheState {
                changed: true,
                fingerprint,
            });
        }

        let stored = match self.cache.load(&item.id) {
            Ok(record) => record,
            Err(e) => {
                warn!(item = %item.id, error = %e, "cache record unreadable; treating as miss");
                None
            }
        };

        let changed = match stored {
            Some(record) => record.state_key != fingerprint.state_key,
            None => true,
        };

        Ok(CacheState {
            changed,
            fingerprint,
        })
    }

    /// Persist the record after a successful run. Write failures are logged,
    /// not fatal: the next run simply recomputes.
    pub fn record_success(&self, item: &WorkItem, fingerprint: &Fingerprint) {
        let record = CacheRecord {
            task: ExecSnapshot::of(item),
            state_key: fingerprint.state_key.clone(),
            stats: fingerprint.stats.clone(),
        };
        if let Err(e) = self.cache.save(&item.id, &record) {
            warn!(item = %item.id, error = %e, "failed to store cache record");
        }
    }

    /// Collect sorted per-file stats for every source spec of the item.
    fn collect_stats(&self, item: &WorkItem) -> Result<BTreeMap<String, FileStat>> {
        let mut stats = BTreeMap::new();

        for spec in item.src.iter() {
            let base = self.root.join(&spec.path);
            let matcher = build_matcher(spec)?;

            if self.fs.is_file(&base) {
                self.stat_file(&base, &mut stats)?;
                continue;
            }
            if !self.fs.is_dir(&base) {
                debug!(item = %item.id, path = %base.display(), "source path missing; skipping");
                continue;
            }

            let mut stack = vec![base.clone()];
            while let Some(dir) = stack.pop() {
                for entry in self.fs.read_dir(&dir)? {
                    if self.fs.is_dir(&entry) {
                        stack.push(entry);
                    } else if self.fs.is_file(&entry) {
                        let rel = entry
                            .strip_prefix(&base)
                            .unwrap_or(&entry)
                            .to_string_lossy()
                            .replace('\\', "/");
                        let matched = match &matcher {
                            Some(set) => set.is_match(&rel),
                            None => true,
                        };
                        if matched {
                            self.stat_file(&entry, &mut stats)?;
                        }
                    }
                }
            }
        }

        Ok(stats)
    }

    fn stat_file(&self, path: &Path, stats: &mut BTreeMap<String, FileStat>) -> Result<()> {
        let display = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let modified = self.fs.modified(path)?;
        let last_modified = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let checksum = match self.mode {
            CacheMode::ModifyDate => None,
            _ => Some(self.file_checksum(path)?),
        };

        stats.insert(
            display,
            FileStat {
                last_modified,
                checksum,
            },
        );
        Ok(())
    }

    /// Stream one file through blake3.
    fn file_checksum(&self, path: &Path) -> Result<String> {
        let mut hasher = Hasher::new();
        let mut reader = self.fs.open_read(path)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut buf)
                .with_context(|| format!("hashing file {:?}", path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

fn build_matcher(spec: &SrcSpec) -> Result<Option<GlobSet>> {
    if spec.matches.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in spec.matches.iter() {
        let glob = Glob::new(pattern)
            .with_context(|| format!("invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().map_err(anyhow::Error::from)?))
}

/// Hash a labelled section as its sorted values, one per line.
fn hash_sorted<I, S>(hasher: &mut Hasher, label: &[u8], values: I)
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = values.map(|s| s.as_ref().to_string()).collect();
    sorted.sort();

    hasher.update(label);
    for value in sorted {
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
}
