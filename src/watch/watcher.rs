// src/watch/watcher.rs

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::EngineEvent;
use crate::watch::debounce::{spawn_debouncer, DEBOUNCE_WINDOW};
use crate::watch::patterns::ItemWatchProfile;

/// Handle for the filesystem watchers.
///
/// Keeps the underlying `RecommendedWatcher` alive; dropping the handle
/// (when the run settles or is canceled) releases every watch.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Spawn filesystem watches for every profile root and wire change events
/// through the debouncer into the engine.
///
/// - Each distinct source root is watched recursively, once.
/// - Raw notify events are bridged into the async world over an unbounded
///   channel (the notify callback runs on its own thread).
/// - Bursts are coalesced by the debouncer before the engine sees them.
pub fn spawn_watcher(
    profiles: Vec<ItemWatchProfile>,
    events: mpsc::UnboundedSender<EngineEvent>,
    window: Option<Duration>,
) -> Result<WatcherHandle> {
    let profiles = Arc::new(profiles);
    let debounce_tx = spawn_debouncer(window.unwrap_or(DEBOUNCE_WINDOW), events);

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        {
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Err(err) = event_tx.send(event) {
                        // Can't log via tracing from the notify thread
                        // reliably; fall back to stderr.
                        eprintln!("workdag: failed to forward notify event: {err}");
                    }
                }
                Err(err) => {
                    eprintln!("workdag: file watch error: {err}");
                }
            }
        },
        Config::default(),
    )?;

    let roots: BTreeSet<PathBuf> = profiles
        .iter()
        .flat_map(|p| p.roots().map(|r| r.to_path_buf()))
        .collect();
    for root in roots.iter() {
        if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
            warn!(root = %root.display(), error = %err, "failed to watch source root");
            continue;
        }
        debug!(root = %root.display(), "watching source root");
    }
    info!(roots = roots.len(), "file watcher started");

    // Async task that maps notify events to item hits.
    let async_profiles = Arc::clone(&profiles);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(?event, "received notify event");

            for path in event.paths.iter() {
                for profile in async_profiles.iter() {
                    if profile.matches(path) {
                        let _ = debounce_tx.send(profile.id().to_string());
                    }
                }
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}
