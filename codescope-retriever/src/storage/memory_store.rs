//! In-memory [`ChunkStore`] with optional JSON persistence.
//!
//! All state sits behind one `tokio::sync::RwLock`. Writers that touch a
//! whole file (`replace_file`, `delete_by_file`) hold the write lock for the
//! entire operation, so readers see either the old or the new chunk set of a
//! file.
//!
//! When opened with a path, the store reloads that file on open and rewrites
//! it every `flush_every` mutations and on [`ChunkStore::flush`]. Writes go to
//! a temporary file in the same directory that is then renamed over the
//! target. A missing, unreadable or corrupt file yields an empty store.

use super::{ChunkFilter, ChunkStore, StoreStats};
use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use chrono::Utc;
use codescope_context::CodeChunk;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    chunks: Vec<CodeChunk>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    chunks: Vec<&'a CodeChunk>,
}

#[derive(Debug, Default)]
struct Inner {
    chunks: HashMap<String, CodeChunk>,
    by_file: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn insert(&mut self, mut chunk: CodeChunk) -> String {
        let id = chunk.ensure_id().to_string();
        chunk.last_updated = Some(Utc::now());
        let file_path = chunk.file_path.clone();

        if let Some(previous) = self.chunks.insert(id.clone(), chunk) {
            if previous.file_path != file_path {
                self.unlink(&previous.file_path, &id);
            }
        }
        self.by_file.entry(file_path).or_default().insert(id.clone());
        id
    }

    fn unlink(&mut self, file_path: &str, id: &str) {
        if let Some(ids) = self.by_file.get_mut(file_path) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_file.remove(file_path);
            }
        }
    }

    /// Insert a chunk read back from disk, keeping its id and timestamp.
    fn insert_loaded(&mut self, mut chunk: CodeChunk) {
        let id = chunk.ensure_id().to_string();
        self.by_file
            .entry(chunk.file_path.clone())
            .or_default()
            .insert(id.clone());
        self.chunks.insert(id, chunk);
    }

    fn remove_file(&mut self, file_path: &str) -> usize {
        let Some(ids) = self.by_file.remove(file_path) else {
            return 0;
        };
        ids.iter()
            .filter(|id| self.chunks.remove(id.as_str()).is_some())
            .count()
    }
}

/// Chunk store held in memory, optionally mirrored to a JSON file.
#[derive(Debug)]
pub struct MemoryChunkStore {
    inner: RwLock<Inner>,
    persist_path: Option<PathBuf>,
    flush_every: usize,
    pending: AtomicUsize,
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChunkStore {
    /// A store that is never persisted.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            persist_path: None,
            flush_every: usize::MAX,
            pending: AtomicUsize::new(0),
        }
    }

    /// Open a store persisted at `path`, loading whatever it holds.
    pub async fn open(path: impl Into<PathBuf>, flush_every: usize) -> Self {
        let path = path.into();
        let mut inner = Inner::default();
        for chunk in load_snapshot(&path).await {
            inner.insert_loaded(chunk);
        }
        info!(
            "Opened chunk store at {} with {} chunks",
            path.display(),
            inner.chunks.len()
        );
        Self {
            inner: RwLock::new(inner),
            persist_path: Some(path),
            flush_every: flush_every.max(1),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Count a mutation and flush once enough have accumulated.
    async fn note_mutation(&self) {
        if self.persist_path.is_none() {
            return;
        }
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if pending >= self.flush_every {
            self.pending.store(0, Ordering::SeqCst);
            if let Err(e) = self.flush().await {
                warn!("Failed to flush chunk store: {}", e);
            }
        }
    }
}

async fn load_snapshot(path: &Path) -> Vec<CodeChunk> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Ignoring unreadable chunk store {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot.chunks,
        Ok(snapshot) => {
            warn!(
                "Ignoring chunk store {} with unsupported version {}",
                path.display(),
                snapshot.version
            );
            Vec::new()
        }
        Err(e) => {
            warn!("Ignoring corrupt chunk store {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, chunk: CodeChunk) -> Result<String> {
        let id = self.inner.write().await.insert(chunk);
        self.note_mutation().await;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<CodeChunk>> {
        Ok(self.inner.read().await.chunks.get(id).cloned())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<usize> {
        let removed = self.inner.write().await.remove_file(file_path);
        if removed > 0 {
            debug!("Deleted {} chunks of {}", removed, file_path);
            self.note_mutation().await;
        }
        Ok(removed)
    }

    async fn list_by_file(&self, file_path: &str) -> Result<Vec<CodeChunk>> {
        let inner = self.inner.read().await;
        let mut chunks: Vec<CodeChunk> = inner
            .by_file
            .get(file_path)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect();
        chunks.sort_by_key(|c| {
            (
                c.metadata.start_line,
                Reverse(c.metadata.end_line),
                Reverse(c.content.len()),
            )
        });
        Ok(chunks)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.chunks.len())
    }

    async fn clear(&self) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            inner.chunks.clear();
            inner.by_file.clear();
        }
        info!("Cleared chunk store");
        self.note_mutation().await;
        Ok(())
    }

    async fn replace_file(&self, file_path: &str, chunks: Vec<CodeChunk>) -> Result<usize> {
        let inserted = {
            let mut inner = self.inner.write().await;
            let removed = inner.remove_file(file_path);
            for mut chunk in chunks {
                if chunk.file_path != file_path {
                    chunk.file_path = file_path.to_string();
                    chunk.id.clear();
                }
                inner.insert(chunk);
            }
            // Colliding ids collapse into one stored chunk.
            let inserted = inner.by_file.get(file_path).map_or(0, BTreeSet::len);
            debug!(
                "Replaced {} chunks of {} with {}",
                removed, file_path, inserted
            );
            inserted
        };
        self.note_mutation().await;
        Ok(inserted)
    }

    async fn list_chunks(&self, filter: &ChunkFilter) -> Result<Vec<CodeChunk>> {
        let inner = self.inner.read().await;
        let mut chunks: Vec<CodeChunk> = inner
            .chunks
            .values()
            .filter(|chunk| filter.matches(chunk))
            .cloned()
            .collect();
        chunks.sort_by(|a, b| {
            (&a.file_path, a.metadata.start_line, &a.id).cmp(&(
                &b.file_path,
                b.metadata.start_line,
                &b.id,
            ))
        });
        Ok(chunks)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read().await;
        let mut stats = StoreStats {
            chunk_count: inner.chunks.len(),
            file_count: inner.by_file.len(),
            ..StoreStats::default()
        };
        for chunk in inner.chunks.values() {
            *stats
                .by_type
                .entry(chunk.chunk_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = self.persist_path.clone() else {
            return Ok(());
        };

        let bytes = {
            let inner = self.inner.read().await;
            let mut chunks: Vec<&CodeChunk> = inner.chunks.values().collect();
            chunks.sort_by(|a, b| {
                (&a.file_path, a.metadata.start_line, &a.id).cmp(&(
                    &b.file_path,
                    b.metadata.start_line,
                    &b.id,
                ))
            });
            serde_json::to_vec(&SnapshotRef {
                version: SNAPSHOT_VERSION,
                chunks,
            })?
        };

        let written = bytes.len();
        let target = path.display().to_string();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| RetrieverError::store(format!("Flush task failed: {e}")))?
            .map_err(|e| RetrieverError::store(format!("Failed to write {target}: {e}")))?;
        debug!("Flushed {} bytes to {}", written, target);
        Ok(())
    }
}
