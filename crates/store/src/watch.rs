//! Filesystem watcher for externally-edited registry files.
//!
//! Watches the premium and admin list files for modifications and sends the
//! changed path through a channel so the gateway can re-read the file and
//! swap the in-memory list.

use std::path::PathBuf;

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer, notify::RecursiveMode,
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::error::Result;

/// A watched registry file changed on disk.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    pub path: PathBuf,
}

/// Debounced watcher over a fixed set of registry files.
pub struct StoreWatcher {
    _debouncer: Debouncer<notify_debouncer_full::notify::RecommendedWatcher, RecommendedCache>,
}

impl StoreWatcher {
    /// Start watching the given files. Returns the watcher and a receiver for
    /// reload events.
    ///
    /// The watcher must be kept alive (not dropped) for events to continue.
    pub fn start(files: Vec<PathBuf>) -> Result<(Self, mpsc::UnboundedReceiver<ReloadEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = files.clone();

        let debouncer = new_debouncer(
            std::time::Duration::from_millis(500),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for path in &event.paths {
                            if !watched.iter().any(|f| f == path) {
                                continue;
                            }
                            use notify_debouncer_full::notify::EventKind;
                            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                                debug!(path = %path.display(), "registry file changed");
                                let _ = tx.send(ReloadEvent { path: path.clone() });
                            }
                        }
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "registry watcher error");
                    }
                },
            },
        )?;

        let mut watcher = Self {
            _debouncer: debouncer,
        };

        for file in &files {
            if let Some(dir) = file.parent()
                && dir.exists()
            {
                watcher._debouncer.watch(dir, RecursiveMode::NonRecursive)?;
                info!(file = %file.display(), "watching registry file");
            }
        }

        Ok((watcher, rx))
    }
}
