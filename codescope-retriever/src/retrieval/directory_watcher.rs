//! Debounced recursive file watching that feeds incremental updates.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use super::indexing_engine::IndexingEngine;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::StreamExt;
use notify::Watcher;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Debounce window used by the CLI. Long enough to ride out a git checkout.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Receives the paths reported by a [`DirectoryWatcher`].
#[async_trait]
pub trait FileEventHandler: Send + Sync {
    async fn file_changed(&self, path: &Path);
    async fn file_removed(&self, path: &Path);
}

#[async_trait]
impl FileEventHandler for IndexingEngine {
    async fn file_changed(&self, path: &Path) {
        self.on_file_changed(path).await
    }

    async fn file_removed(&self, path: &Path) {
        self.on_file_removed(path).await
    }
}

/// Watches directories and forwards debounced change events to a handler.
/// Watching stops when the watcher is dropped or shut down.
pub struct DirectoryWatcher {
    roots: Vec<PathBuf>,
    event_watcher: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    listener: tokio::task::JoinHandle<()>,
}

impl DirectoryWatcher {
    pub fn start<H: FileEventHandler + 'static>(
        roots: &[PathBuf],
        handler: Arc<H>,
        debounce: Duration,
    ) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::channel(128);
        let listener = tokio::task::spawn(Self::listen(events_rx, handler));

        let mut event_watcher = notify_debouncer_mini::new_debouncer(
            debounce,
            move |res: notify_debouncer_mini::DebounceEventResult| match res {
                Ok(events) => {
                    for ev in events {
                        // Runs on the debouncer's own thread, not in the runtime
                        if events_tx.blocking_send(ev.path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
        )?;

        for root in roots {
            event_watcher
                .watcher()
                .watch(root, notify::RecursiveMode::Recursive)?;
            info!("Watching {}", root.display());
        }

        Ok(Self {
            roots: roots.to_vec(),
            event_watcher,
            listener,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stop watching and wait for in-flight events to be handled.
    pub async fn shutdown(self) {
        let Self {
            event_watcher,
            listener,
            ..
        } = self;
        drop(event_watcher);
        if let Err(e) = listener.await {
            warn!("File event listener failed: {}", e);
        }
    }

    async fn listen<H: FileEventHandler + 'static>(
        events_rx: mpsc::Receiver<PathBuf>,
        handler: Arc<H>,
    ) {
        let handler_ref = &handler;
        ReceiverStream::new(events_rx)
            .for_each_concurrent(16, |path| async move {
                match tokio::fs::metadata(&path).await {
                    Ok(metadata) if metadata.is_file() => handler_ref.file_changed(&path).await,
                    Ok(_) => debug!("Ignoring directory event for {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        handler_ref.file_removed(&path).await
                    }
                    Err(e) => warn!("Cannot inspect {}: {}", path.display(), e),
                }
            })
            .await;
    }
}
