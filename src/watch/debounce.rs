// src/watch/debounce.rs

//! Debouncing of filesystem event bursts.
//!
//! Editor saves and git checkouts produce flurries of change events for the
//! same item. The debouncer collects the affected item ids and flushes them
//! as a single batch once the window elapses, so each burst triggers one
//! re-evaluation per item.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::dag::item::ItemId;
use crate::engine::EngineEvent;

/// Default debounce window.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Spawn the debounce task. Returns the sender for raw (undebounced) item
/// hits; debounced [`EngineEvent::SourceChanged`] events flow into `events`.
///
/// The task ends when every sender of the returned channel is dropped.
pub fn spawn_debouncer(
    window: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> mpsc::UnboundedSender<ItemId> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ItemId>();

    tokio::spawn(async move {
        loop {
            // Block until the first hit of a burst.
            let Some(first) = rx.recv().await else {
                break;
            };

            let mut dirty: BTreeSet<ItemId> = BTreeSet::new();
            dirty.insert(first);

            // Collect everything else arriving inside the window.
            let deadline = sleep(window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    more = rx.recv() => {
                        match more {
                            Some(id) => {
                                dirty.insert(id);
                            }
                            None => break,
                        }
                    }
                    _ = &mut deadline => break,
                }
            }

            debug!(items = dirty.len(), "debounce window elapsed; flushing");
            for id in dirty {
                if events.send(EngineEvent::SourceChanged { id }).is_err() {
                    return;
                }
            }
        }

        debug!("debouncer finished (channel closed)");
    });

    tx
}
