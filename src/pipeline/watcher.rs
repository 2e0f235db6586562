//! Filesystem change notification
//!
//! Wraps a debounced `notify` watcher and bridges its events onto a tokio
//! channel so the async scheduler can `select!` over change batches and the
//! shutdown signal. Multiple change events for the same path inside the
//! debounce window collapse into a single batch.
//!
//! Watcher-subsystem failures after startup are logged and skipped rather
//! than terminating the session: the watch loop keeps running in degraded
//! mode on whatever events still arrive.

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Errors from the watch subsystem.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to initialize file watcher: {0}")]
    Init(notify::Error),

    #[error("Failed to watch {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Watch channel closed unexpectedly")]
    ChannelClosed,

    #[error(transparent)]
    Structural(#[from] super::graph::StructuralError),
}

/// A stream of debounced change batches rooted at a project directory.
///
/// Dropping the stream stops the underlying watcher.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ChangeStream {
    /// Watches `root` recursively with the given debounce window.
    pub fn watch(root: &Path, debounce: Duration) -> Result<Self, WatchError> {
        let (std_tx, std_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(debounce, std_tx).map_err(WatchError::Init)?;
        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Path {
                path: root.to_path_buf(),
                source,
            })?;

        // Bridge the debouncer's std channel onto a tokio channel. The
        // thread exits when either side hangs up.
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            while let Ok(batch) = std_rx.recv() {
                match batch {
                    Ok(events) => {
                        let paths: Vec<PathBuf> = events
                            .into_iter()
                            .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                            .map(|e| e.path)
                            .collect();
                        if !paths.is_empty() && tx.send(paths).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(error = ?error, "filesystem watch error, continuing degraded");
                    }
                }
            }
        });

        Ok(Self {
            rx,
            _debouncer: debouncer,
        })
    }

    /// Next coalesced batch of changed paths. `None` once the watcher side
    /// has shut down.
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.rx.recv().await
    }
}
