//! Indexing engine that keeps a [`ChunkStore`] in sync with the workspace.
//!
//! The engine walks the configured roots, extracts chunks from every
//! supported file and writes them to the store one file at a time. It also
//! accepts incremental updates from a file watcher.
//!
//! ## Key Components
//!
//! - **IndexingEngine**: orchestrates discovery, extraction and storage
//! - **ScanHandle**: progress, cancellation and completion of a background scan
//! - **ScanReport**: what a full scan did
//! - **ProcessingStats**: running totals across all sessions
//!
//! ## Pipeline Flow
//!
//! ```text
//! roots → ignore::Walk → batches → read → ExtractorRegistry → ChunkStore::replace_file
//!                          ↑                (blocking pool)
//!                   DirectoryWatcher → on_file_changed / on_file_removed
//! ```
//!
//! ## Sessions
//!
//! Only one full scan runs at a time. The engine moves
//! `Idle → Indexing → Idle`, or `Indexing → Cancelled → Idle` when a scan is
//! cancelled. Starting a scan while one is in flight returns `None` and leaves
//! the running scan alone. Cancellation is checked between batches and never
//! rolls back chunks that were already written.
//!
//! Reading, extracting and replacing one file happens under a per-file lock,
//! so a watcher event and a running scan never interleave on the same path.

use crate::config::{DEFAULT_EXCLUDED_DIRS, IndexingEngineConfig, compile_patterns};
use crate::error::{Result, RetrieverError};
use crate::storage::{ChunkFilter, ChunkStore, StoreStats, memory_store::MemoryChunkStore};
use codescope_context::extract::whole_file_chunk;
use codescope_context::{CodeChunk, ExtractorRegistry, Language, SourceFile};
use futures::future::join_all;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

const IDLE: u8 = 0;
const INDEXING: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle state of the engine's full-scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    Idle,
    Indexing,
    Cancelled,
}

impl IndexerState {
    fn from_u8(value: u8) -> Self {
        match value {
            INDEXING => IndexerState::Indexing,
            CANCELLED => IndexerState::Cancelled,
            _ => IndexerState::Idle,
        }
    }
}

/// Per-scan overrides of the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Cap on discovered files. `None` uses the configured `max_files`.
    pub max_files: Option<usize>,
    /// Glob patterns excluded in addition to the configured ones
    pub exclude_patterns: Vec<String>,
}

impl ScanOptions {
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }
}

/// Files processed so far in the current (or last) scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
}

/// Outcome of one full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub files_discovered: usize,
    pub files_indexed: usize,
    /// Files whose content hash matched the last indexed version
    pub files_unchanged: usize,
    /// Files over the size ceiling
    pub files_skipped: usize,
    pub errors: usize,
    pub chunks_written: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl ScanReport {
    fn record(&mut self, path: &str, outcome: &Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Indexed(chunks)) => {
                self.files_indexed += 1;
                self.chunks_written += chunks;
            }
            Ok(FileOutcome::Unchanged) => self.files_unchanged += 1,
            Err(err @ RetrieverError::FileTooLarge { .. }) => {
                warn!("Skipping {}: {}", path, err);
                self.files_skipped += 1;
            }
            Err(err) => {
                warn!("Failed to index {}: {}", path, err);
                self.errors += 1;
            }
        }
    }
}

/// Running totals across every session and incremental update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub errors: usize,
    pub scans_completed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Indexed(usize),
    Unchanged,
}

#[derive(Debug)]
struct Session {
    state: AtomicU8,
    cancel_requested: AtomicBool,
    progress: watch::Sender<ScanProgress>,
}

impl Session {
    fn new() -> Self {
        let (progress, _) = watch::channel(ScanProgress::default());
        Self {
            state: AtomicU8::new(IDLE),
            cancel_requested: AtomicBool::new(false),
            progress,
        }
    }

    fn begin(self: &Arc<Self>) -> Option<SessionGuard> {
        self.state
            .compare_exchange(IDLE, INDEXING, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.progress.send_replace(ScanProgress::default());
        Some(SessionGuard {
            session: Arc::clone(self),
        })
    }

    fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(INDEXING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cancelled {
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
        cancelled
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// Returns the session to `Idle` when the scan ends, however it ends.
struct SessionGuard {
    session: Arc<Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.cancel_requested.store(false, Ordering::SeqCst);
        self.session.state.store(IDLE, Ordering::SeqCst);
    }
}

/// A full scan running in the background.
#[derive(Debug)]
pub struct ScanHandle {
    progress: watch::Receiver<ScanProgress>,
    session: Arc<Session>,
    task: JoinHandle<ScanReport>,
}

impl ScanHandle {
    pub fn progress(&self) -> ScanProgress {
        *self.progress.borrow()
    }

    /// Stream of progress updates, starting with the current value.
    pub fn progress_stream(&self) -> WatchStream<ScanProgress> {
        WatchStream::new(self.progress.clone())
    }

    /// Request cancellation. The scan stops before its next batch.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Wait for the scan to finish.
    pub async fn join(self) -> ScanReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Full scan task failed: {}", e);
                ScanReport {
                    cancelled: true,
                    ..ScanReport::default()
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Root {
    path: PathBuf,
    /// Prefix of stored paths when several roots are configured
    label: Option<String>,
    /// `.gitignore` and `.ignore` rules at the top of the root
    ignored: Gitignore,
}

impl Root {
    fn new(path: PathBuf, label: Option<String>) -> Self {
        let mut builder = GitignoreBuilder::new(&path);
        for name in [".gitignore", ".ignore"] {
            let file = path.join(name);
            if file.is_file() {
                if let Some(e) = builder.add(&file) {
                    warn!("Failed to read {}: {}", file.display(), e);
                }
            }
        }
        let ignored = builder.build().unwrap_or_else(|e| {
            warn!("Invalid ignore rules under {}: {}", path.display(), e);
            Gitignore::empty()
        });
        Self { path, label, ignored }
    }

    fn ignores(&self, absolute: &Path) -> bool {
        absolute.starts_with(&self.path)
            && self
                .ignored
                .matched_path_or_any_parents(absolute, false)
                .is_ignore()
    }
}

/// A file resolved against the configured roots.
#[derive(Debug, Clone)]
struct Target {
    absolute: PathBuf,
    /// Path stored in chunks
    relative: String,
    /// Path relative to its own root, matched against exclude patterns
    root_relative: String,
}

impl Target {
    fn under(root: &Root, absolute: PathBuf) -> Option<Self> {
        let root_relative = slash_path(absolute.strip_prefix(&root.path).ok()?)?;
        let relative = match &root.label {
            Some(label) => format!("{label}/{root_relative}"),
            None => root_relative.clone(),
        };
        Some(Self {
            absolute,
            relative,
            root_relative,
        })
    }
}

/// The main indexing engine
pub struct IndexingEngine {
    config: IndexingEngineConfig,
    roots: Vec<Root>,
    extensions: HashSet<String>,
    excludes: Vec<glob::Pattern>,
    store: Arc<dyn ChunkStore>,
    registry: Arc<ExtractorRegistry>,
    session: Arc<Session>,
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Content hash of the last indexed version of each file
    hashes: RwLock<HashMap<String, blake3::Hash>>,
    stats: RwLock<ProcessingStats>,
}

impl IndexingEngine {
    /// Create an engine writing to `store`.
    ///
    /// # Errors
    /// [`RetrieverError::Config`] when the configuration does not validate.
    pub fn new(config: IndexingEngineConfig, store: Arc<dyn ChunkStore>) -> Result<Self> {
        config.validate()?;
        let multiple = config.roots.len() > 1;
        let roots = config
            .roots
            .iter()
            .enumerate()
            .map(|(i, root)| {
                let path = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
                let label = multiple.then(|| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| format!("root{i}"))
                });
                Root::new(path, label)
            })
            .collect();

        Ok(Self {
            extensions: config.effective_extensions().into_iter().collect(),
            excludes: config.compiled_excludes()?,
            roots,
            config,
            store,
            registry: Arc::new(ExtractorRegistry::default()),
            session: Arc::new(Session::new()),
            file_locks: Mutex::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            stats: RwLock::new(ProcessingStats::default()),
        })
    }

    /// Create an engine with a [`MemoryChunkStore`], persisted to the
    /// configured `store_path` when one is set.
    pub async fn open(config: IndexingEngineConfig) -> Result<Self> {
        let store: Arc<dyn ChunkStore> = match &config.store_path {
            Some(path) => Arc::new(MemoryChunkStore::open(path, config.flush_every).await),
            None => Arc::new(MemoryChunkStore::new()),
        };
        Self::new(config, store)
    }

    /// Replace the extractor registry.
    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &IndexingEngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Canonical root directories
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|root| root.path.clone()).collect()
    }

    pub fn state(&self) -> IndexerState {
        IndexerState::from_u8(self.session.state.load(Ordering::SeqCst))
    }

    /// Progress of the running scan, or of the last one.
    pub fn session_progress(&self) -> ScanProgress {
        *self.session.progress.borrow()
    }

    pub async fn stats(&self) -> ProcessingStats {
        self.stats.read().await.clone()
    }

    pub async fn index_stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Start a full scan as a background task.
    ///
    /// Returns `None` without side effects when a scan is already running.
    pub fn start_full_scan(self: &Arc<Self>, options: ScanOptions) -> Option<ScanHandle> {
        let guard = self.session.begin()?;
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = guard;
            engine.run_session(options).await
        });
        Some(ScanHandle {
            progress: self.session.progress.subscribe(),
            session: Arc::clone(&self.session),
            task,
        })
    }

    /// Run a full scan on the current task. Returns `None` when a scan is
    /// already running.
    pub async fn full_scan(&self, options: ScanOptions) -> Option<ScanReport> {
        let _guard = self.session.begin()?;
        Some(self.run_session(options).await)
    }

    /// Request cancellation of the running scan. Returns whether a scan was running.
    pub fn cancel(&self) -> bool {
        let cancelled = self.session.cancel();
        if cancelled {
            info!("Cancellation requested for the running scan");
        }
        cancelled
    }

    async fn run_session(&self, options: ScanOptions) -> ScanReport {
        let started = Instant::now();
        let max_files = options.max_files.unwrap_or(self.config.max_files);
        let mut excludes = self.excludes.clone();
        match compile_patterns(&options.exclude_patterns) {
            Ok(extra) => excludes.extend(extra),
            Err(e) => warn!("Ignoring scan exclude patterns: {}", e),
        }

        info!("Starting full scan of {} root(s)", self.roots.len());
        let roots = self.roots.clone();
        let extensions = self.extensions.clone();
        let files = match tokio::task::spawn_blocking(move || {
            discover_files(&roots, &extensions, &excludes, max_files)
        })
        .await
        {
            Ok(files) => files,
            Err(e) => {
                error!("File discovery failed: {}", e);
                Vec::new()
            }
        };

        let total = files.len();
        info!("Discovered {} files to index", total);
        let mut report = ScanReport {
            files_discovered: total,
            ..ScanReport::default()
        };
        let mut processed = 0;
        self.session
            .progress
            .send_replace(ScanProgress { processed, total });

        for (i, batch) in files.chunks(self.config.batch_size).enumerate() {
            if i > 0 {
                pause(self.config.batch_delay()).await;
            }
            if self.session.is_cancelled() {
                info!("Full scan cancelled after {}/{} files", processed, total);
                report.cancelled = true;
                break;
            }

            let outcomes = join_all(batch.iter().map(|target| self.process_file(target, true))).await;
            for (target, outcome) in batch.iter().zip(&outcomes) {
                report.record(&target.relative, outcome);
                self.note(outcome).await;
            }

            processed += batch.len();
            self.session
                .progress
                .send_replace(ScanProgress { processed, total });
        }

        if let Err(e) = self.store.flush().await {
            warn!("Failed to flush chunk store: {}", e);
        }
        self.stats.write().await.scans_completed += 1;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Full scan finished: {} indexed, {} unchanged, {} skipped, {} errors, {} chunks in {}ms",
            report.files_indexed,
            report.files_unchanged,
            report.files_skipped,
            report.errors,
            report.chunks_written,
            report.elapsed_ms
        );
        report
    }

    /// Index one file now, regardless of whether its content changed.
    /// Returns the number of chunks written.
    ///
    /// # Errors
    /// - [`RetrieverError::Io`] when the file cannot be read
    /// - [`RetrieverError::FileTooLarge`] above `max_file_chars`
    /// - [`RetrieverError::Extraction`] when the path is outside every root
    pub async fn index_file(&self, path: &Path) -> Result<usize> {
        let target = self.resolve(path).ok_or_else(|| RetrieverError::Extraction {
            path: path.to_path_buf(),
            message: "not under any configured root".to_string(),
        })?;
        let outcome = self.process_file(&target, false).await;
        self.note(&outcome).await;
        match outcome? {
            FileOutcome::Indexed(chunks) => Ok(chunks),
            FileOutcome::Unchanged => Ok(0),
        }
    }

    /// Re-index a file after a change notification.
    ///
    /// Files outside the roots, excluded, with unsupported extensions or over
    /// the size ceiling are ignored. Failures are logged, never returned.
    pub async fn on_file_changed(&self, path: &Path) {
        let Some(target) = self.resolve(path) else {
            debug!("Ignoring change outside roots: {}", path.display());
            return;
        };
        if !self.is_indexable(&target) {
            debug!("Ignoring change to {}", target.relative);
            return;
        }

        let outcome = self.process_file(&target, true).await;
        self.note(&outcome).await;
        match outcome {
            Ok(FileOutcome::Indexed(chunks)) => {
                debug!("Re-indexed {} ({} chunks)", target.relative, chunks)
            }
            Ok(FileOutcome::Unchanged) => debug!("{} is unchanged", target.relative),
            Err(err @ RetrieverError::FileTooLarge { .. }) => {
                warn!("Skipping {}: {}", target.relative, err)
            }
            Err(err) => warn!("Failed to re-index {}: {}", target.relative, err),
        }
    }

    /// Drop the chunks of a deleted file, or of every file under a deleted directory.
    pub async fn on_file_removed(&self, path: &Path) {
        let Some(target) = self.resolve(path) else {
            return;
        };

        let key = target.relative.clone();
        match self.locked(&key, self.store.delete_by_file(&key)).await {
            Ok(0) => self.remove_directory(&key).await,
            Ok(removed) => {
                self.hashes.write().await.remove(&key);
                debug!("Removed {} chunks of {}", removed, key);
            }
            Err(e) => warn!("Failed to remove {}: {}", key, e),
        }
    }

    async fn remove_directory(&self, relative: &str) {
        let prefix = format!("{relative}/");
        let filter = ChunkFilter::default().with_path_prefix(prefix.as_str());
        let files: BTreeSet<String> = match self.store.list_chunks(&filter).await {
            Ok(chunks) => chunks.into_iter().map(|chunk| chunk.file_path).collect(),
            Err(e) => {
                warn!("Failed to list chunks under {}: {}", relative, e);
                return;
            }
        };

        for file in &files {
            if let Err(e) = self.locked(file, self.store.delete_by_file(file)).await {
                warn!("Failed to remove {}: {}", file, e);
            }
        }
        self.hashes
            .write()
            .await
            .retain(|path, _| !path.starts_with(&prefix));
        if !files.is_empty() {
            debug!("Removed {} files under {}", files.len(), relative);
        }
    }

    /// Remove every chunk and forget the content hashes.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        self.hashes.write().await.clear();
        self.store.flush().await?;
        info!("Cleared the chunk store");
        Ok(())
    }

    fn resolve(&self, path: &Path) -> Option<Target> {
        let absolute = normalize(path);
        self.roots
            .iter()
            .find_map(|root| Target::under(root, absolute.clone()))
    }

    /// Same rules as discovery: extension, excluded and hidden paths, ignore
    /// files and exclude patterns.
    fn is_indexable(&self, target: &Target) -> bool {
        has_extension(&target.absolute, &self.extensions)
            && !in_excluded_dir(&target.root_relative)
            && !is_hidden(&target.root_relative)
            && !self.roots.iter().any(|root| root.ignores(&target.absolute))
            && !self
                .excludes
                .iter()
                .any(|pattern| pattern.matches(&target.root_relative))
    }

    async fn note(&self, outcome: &Result<FileOutcome>) {
        let mut stats = self.stats.write().await;
        match outcome {
            Ok(FileOutcome::Indexed(chunks)) => {
                stats.files_processed += 1;
                stats.chunks_created += chunks;
            }
            Ok(FileOutcome::Unchanged) | Err(RetrieverError::FileTooLarge { .. }) => {
                stats.files_skipped += 1
            }
            Err(_) => stats.errors += 1,
        }
    }

    async fn process_file(&self, target: &Target, skip_unchanged: bool) -> Result<FileOutcome> {
        self.locked(&target.relative, self.read_and_store(target, skip_unchanged))
            .await
    }

    async fn read_and_store(&self, target: &Target, skip_unchanged: bool) -> Result<FileOutcome> {
        let text = tokio::fs::read_to_string(&target.absolute)
            .await
            .map_err(|e| RetrieverError::io(&target.absolute, e))?;
        let chars = text.chars().count();
        if chars > self.config.max_file_chars {
            return Err(RetrieverError::FileTooLarge {
                path: target.absolute.clone(),
                chars,
                limit: self.config.max_file_chars,
            });
        }

        let hash = blake3::hash(text.as_bytes());
        if skip_unchanged && self.hashes.read().await.get(&target.relative) == Some(&hash) {
            return Ok(FileOutcome::Unchanged);
        }

        let chunks = self.extract(target, text).await;
        let written = self.store.replace_file(&target.relative, chunks).await?;
        self.hashes
            .write()
            .await
            .insert(target.relative.clone(), hash);
        debug!("Indexed {} ({} chunks)", target.relative, written);
        Ok(FileOutcome::Indexed(written))
    }

    /// Run extraction on the blocking pool. A panicking extractor degrades
    /// to the whole-file chunk.
    async fn extract(&self, target: &Target, text: String) -> Vec<CodeChunk> {
        let language = Language::from_path(&target.absolute);
        let content: Arc<str> = Arc::from(text);
        let registry = Arc::clone(&self.registry);
        let task_content = Arc::clone(&content);
        let path = target.relative.clone();

        match tokio::task::spawn_blocking(move || registry.extract(&task_content, language, &path))
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                let err = RetrieverError::Extraction {
                    path: target.absolute.clone(),
                    message: e.to_string(),
                };
                warn!("{}; keeping only the whole-file chunk", err);
                vec![whole_file_chunk(&SourceFile::new(
                    &content,
                    language,
                    &target.relative,
                ))]
            }
        }
    }

    /// Run `work` while holding the lock of one stored path.
    async fn locked<T>(&self, key: &str, work: impl Future<Output = T>) -> T {
        let lock = Arc::clone(self.file_locks.lock().await.entry(key.to_string()).or_default());
        let output = {
            let _held = lock.lock().await;
            work.await
        };
        drop(lock);

        let mut locks = self.file_locks.lock().await;
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
        output
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// Walk every root in file-name order and collect indexable files, up to `max_files`.
fn discover_files(
    roots: &[Root],
    extensions: &HashSet<String>,
    excludes: &[glob::Pattern],
    max_files: usize,
) -> Vec<Target> {
    let mut files = Vec::new();
    for root in roots {
        let walker = ignore::WalkBuilder::new(&root.path)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir
                    && entry.depth() > 0
                    && DEFAULT_EXCLUDED_DIRS
                        .iter()
                        .any(|dir| entry.file_name() == *dir))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if !has_extension(entry.path(), extensions) {
                continue;
            }
            let Some(target) = Target::under(root, entry.into_path()) else {
                continue;
            };
            if excludes
                .iter()
                .any(|pattern| pattern.matches(&target.root_relative))
            {
                debug!("Excluded {}", target.relative);
                continue;
            }

            files.push(target);
            if files.len() >= max_files {
                info!("Reached the limit of {} files", max_files);
                return files;
            }
        }
    }
    files
}

fn has_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext.to_ascii_lowercase()))
}

fn in_excluded_dir(root_relative: &str) -> bool {
    let mut dirs = root_relative.split('/').rev().skip(1);
    dirs.any(|dir| DEFAULT_EXCLUDED_DIRS.contains(&dir))
}

fn is_hidden(root_relative: &str) -> bool {
    root_relative.split('/').any(|part| part.starts_with('.'))
}

/// `/`-joined components, `None` for an empty path.
fn slash_path(path: &Path) -> Option<String> {
    let joined = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

/// Canonicalize `path`, or its parent when the file itself no longer exists.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(parent) = std::fs::canonicalize(parent) {
            return parent.join(name);
        }
    }
    absolute
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_context::{ChunkExtractor, ChunkType, LanguageFamily};
    use tempfile::{TempDir, tempdir};
    use tracing_test::traced_test;

    fn workspace(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (path, content) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    fn engine(dir: &TempDir) -> IndexingEngine {
        let config = IndexingEngineConfig::new(dir.path()).with_batch_delay(Duration::ZERO);
        IndexingEngine::new(config, Arc::new(MemoryChunkStore::new())).unwrap()
    }

    async fn stored_files(engine: &IndexingEngine) -> BTreeSet<String> {
        engine
            .store()
            .list_chunks(&ChunkFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.file_path)
            .collect()
    }

    #[tokio::test]
    async fn test_discovery_skips_excluded_and_unsupported() -> Result<()> {
        let dir = workspace(&[
            ("src/app.ts", "export function app() {}\n"),
            ("src/gen/api.ts", "export function api() {}\n"),
            ("node_modules/lib/index.js", "function lib() {}\n"),
            ("README.md", "# readme\n"),
            ("scripts/build.sh", "echo hi\n"),
        ]);
        let config = IndexingEngineConfig::new(dir.path())
            .with_exclude_patterns(vec!["src/gen/**".to_string()])
            .with_batch_delay(Duration::ZERO);
        let engine = IndexingEngine::new(config, Arc::new(MemoryChunkStore::new()))?;

        let report = engine.full_scan(ScanOptions::default()).await.unwrap();
        assert_eq!(report.files_discovered, 2);
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.errors, 0);
        assert!(!report.cancelled);
        assert_eq!(
            stored_files(&engine).await,
            BTreeSet::from(["scripts/build.sh".to_string(), "src/app.ts".to_string()])
        );
        assert_eq!(engine.state(), IndexerState::Idle);
        assert_eq!(engine.session_progress(), ScanProgress { processed: 2, total: 2 });
        Ok(())
    }

    #[tokio::test]
    async fn test_max_files_and_scan_excludes() -> Result<()> {
        let dir = workspace(&[
            ("a.py", "def a():\n    pass\n"),
            ("b.py", "def b():\n    pass\n"),
            ("c.py", "def c():\n    pass\n"),
        ]);
        let engine = engine(&dir);

        let options = ScanOptions::default()
            .with_max_files(2)
            .with_exclude_patterns(vec!["a.*".to_string()]);
        let report = engine.full_scan(options).await.unwrap();
        assert_eq!(report.files_discovered, 2);
        assert_eq!(
            stored_files(&engine).await,
            BTreeSet::from(["b.py".to_string(), "c.py".to_string()])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_files_are_skipped_until_cleared() -> Result<()> {
        let dir = workspace(&[("lib.rs", "fn one() {}\n")]);
        let engine = engine(&dir);

        let first = engine.full_scan(ScanOptions::default()).await.unwrap();
        assert_eq!((first.files_indexed, first.chunks_written), (1, 2));

        let second = engine.full_scan(ScanOptions::default()).await.unwrap();
        assert_eq!((second.files_indexed, second.files_unchanged), (0, 1));
        assert_eq!(engine.store().count().await?, 2);

        engine.clear().await?;
        assert_eq!(engine.store().count().await?, 0);
        let third = engine.full_scan(ScanOptions::default()).await.unwrap();
        assert_eq!(third.files_indexed, 1);
        assert_eq!(engine.store().count().await?, 2);

        let stats = engine.stats().await;
        assert_eq!(stats.scans_completed, 3);
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.files_skipped, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_single_flight_and_cancellation() -> Result<()> {
        let dir = workspace(&[
            ("a.js", "function a() {}\n"),
            ("b.js", "function b() {}\n"),
            ("c.js", "function c() {}\n"),
        ]);
        let config = IndexingEngineConfig::new(dir.path())
            .with_batch_size(1)
            .with_batch_delay(Duration::from_millis(200));
        let engine = Arc::new(IndexingEngine::new(config, Arc::new(MemoryChunkStore::new()))?);

        let handle = engine.start_full_scan(ScanOptions::default()).unwrap();
        assert_eq!(engine.state(), IndexerState::Indexing);
        assert!(engine.start_full_scan(ScanOptions::default()).is_none());
        assert!(engine.full_scan(ScanOptions::default()).await.is_none());

        assert!(engine.cancel());
        assert_eq!(engine.state(), IndexerState::Cancelled);
        assert!(!engine.cancel());

        let report = handle.join().await;
        assert!(report.cancelled);
        assert!(report.files_indexed < 3);
        assert_eq!(engine.state(), IndexerState::Idle);

        // A new session can start once the old one is gone
        let handle = engine.start_full_scan(ScanOptions::default()).unwrap();
        let report = handle.join().await;
        assert!(!report.cancelled);
        assert_eq!(report.files_discovered, 3);
        assert_eq!(engine.session_progress(), ScanProgress { processed: 3, total: 3 });
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_on_file_changed_ignores_what_it_should() -> Result<()> {
        let big = "x ".repeat(60);
        let dir = workspace(&[
            ("notes.txt", "hello"),
            ("target/debug/build.rs", "fn build() {}"),
            ("big.js", big.as_str()),
        ]);
        let config = IndexingEngineConfig::new(dir.path()).with_max_file_chars(100);
        let engine = IndexingEngine::new(config, Arc::new(MemoryChunkStore::new()))?;

        engine.on_file_changed(&dir.path().join("notes.txt")).await;
        engine.on_file_changed(&dir.path().join("target/debug/build.rs")).await;
        engine.on_file_changed(&dir.path().join("big.js")).await;
        engine.on_file_changed(Path::new("/definitely/not/here.rs")).await;

        assert_eq!(engine.store().count().await?, 0);
        assert!(logs_contain("Skipping big.js"));

        let err = engine.index_file(&dir.path().join("big.js")).await.unwrap_err();
        assert!(matches!(err, RetrieverError::FileTooLarge { chars: 120, limit: 100, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_removal_of_files_and_directories() -> Result<()> {
        let dir = workspace(&[
            ("keep.go", "package main\n\nfunc keep() {}\n"),
            ("pkg/a.go", "package pkg\n\nfunc A() {}\n"),
            ("pkg/b.go", "package pkg\n\nfunc B() {}\n"),
        ]);
        let engine = engine(&dir);
        engine.full_scan(ScanOptions::default()).await.unwrap();
        assert_eq!(stored_files(&engine).await.len(), 3);

        std::fs::remove_file(dir.path().join("keep.go")).unwrap();
        engine.on_file_removed(&dir.path().join("keep.go")).await;
        assert_eq!(
            stored_files(&engine).await,
            BTreeSet::from(["pkg/a.go".to_string(), "pkg/b.go".to_string()])
        );

        std::fs::remove_dir_all(dir.path().join("pkg")).unwrap();
        engine.on_file_removed(&dir.path().join("pkg")).await;
        assert!(stored_files(&engine).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_roots_are_labelled() -> Result<()> {
        let web = workspace(&[("main.ts", "function main() {}\n")]);
        let api = workspace(&[("main.py", "def main():\n    pass\n")]);
        let config = IndexingEngineConfig::default()
            .with_roots(vec![web.path().to_path_buf(), api.path().to_path_buf()])
            .with_batch_delay(Duration::ZERO);
        let engine = IndexingEngine::new(config, Arc::new(MemoryChunkStore::new()))?;
        engine.full_scan(ScanOptions::default()).await.unwrap();

        let label = |dir: &TempDir| {
            let canonical = std::fs::canonicalize(dir.path()).unwrap();
            canonical.file_name().unwrap().to_string_lossy().into_owned()
        };
        assert_eq!(
            stored_files(&engine).await,
            BTreeSet::from([
                format!("{}/main.ts", label(&web)),
                format!("{}/main.py", label(&api)),
            ])
        );
        Ok(())
    }

    struct PanickingExtractor;

    impl ChunkExtractor for PanickingExtractor {
        fn extract(&self, _file: &SourceFile<'_>) -> Vec<CodeChunk> {
            panic!("extractor bug");
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn test_extractor_panic_keeps_whole_file_chunk() -> Result<()> {
        let dir = workspace(&[("app.js", "function app() {}\n")]);
        let mut registry = ExtractorRegistry::empty();
        registry.register_family(LanguageFamily::Brace, Arc::new(PanickingExtractor));
        let engine = engine(&dir).with_registry(registry);

        let written = engine.index_file(&dir.path().join("app.js")).await?;
        assert_eq!(written, 1);
        let chunks = engine.store().list_by_file("app.js").await?;
        assert_eq!(chunks[0].chunk_type, ChunkType::Other);
        assert!(logs_contain("keeping only the whole-file chunk"));
        Ok(())
    }

    #[tokio::test]
    async fn test_change_events_follow_discovery_ignores() -> Result<()> {
        let dir = workspace(&[
            (".gitignore", "generated/\n*.min.js\n"),
            ("src/app.js", "function app() {}\n"),
            ("generated/api.js", "function api() {}\n"),
            ("src/vendor.min.js", "function vendor() {}\n"),
            (".config/tool.js", "function tool() {}\n"),
        ]);
        let engine = engine(&dir);
        engine.full_scan(ScanOptions::default()).await.unwrap();
        let indexed = BTreeSet::from(["src/app.js".to_string()]);
        assert_eq!(stored_files(&engine).await, indexed);

        for path in ["generated/api.js", "src/vendor.min.js", ".config/tool.js"] {
            engine.on_file_changed(&dir.path().join(path)).await;
        }
        assert_eq!(stored_files(&engine).await, indexed);
        Ok(())
    }

    const HOT_TWO: &str = "function alpha(){return 1;}\nfunction beta(){return 2;}\n";
    const HOT_ONE: &str = "function gamma(){return 3;}\n";

    /// The chunk set of `hot.js` must always be exactly one version of the file.
    async fn assert_consistent(engine: &IndexingEngine) -> &'static str {
        let chunks = engine.store().list_by_file("hot.js").await.unwrap();
        let wholes: Vec<&CodeChunk> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Other)
            .collect();
        assert_eq!(wholes.len(), 1, "expected one whole-file chunk: {chunks:?}");

        let version = if wholes[0].content.trim_end() == HOT_TWO.trim_end() {
            HOT_TWO
        } else {
            assert_eq!(wholes[0].content.trim_end(), HOT_ONE.trim_end());
            HOT_ONE
        };
        let names: BTreeSet<&str> = chunks
            .iter()
            .filter(|c| c.chunk_type != ChunkType::Other)
            .map(|c| c.metadata.name.as_str())
            .collect();
        let expected = if version == HOT_TWO {
            BTreeSet::from(["alpha", "beta"])
        } else {
            BTreeSet::from(["gamma"])
        };
        assert_eq!(names, expected);
        version
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_changes_during_scan_never_mix_versions() -> Result<()> {
        let mut files: Vec<(String, String)> = (0..40)
            .map(|i| (format!("src/mod{i:02}.js"), format!("function f{i}() {{}}\n")))
            .collect();
        files.push(("hot.js".to_string(), HOT_TWO.to_string()));
        let borrowed: Vec<(&str, &str)> = files
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_str()))
            .collect();
        let dir = workspace(&borrowed);
        let hot = dir.path().join("hot.js");
        let swap = dir.path().join(".hot.js.swap");

        let config = IndexingEngineConfig::new(dir.path())
            .with_batch_size(2)
            .with_batch_delay(Duration::from_millis(1));
        let engine = Arc::new(IndexingEngine::new(config, Arc::new(MemoryChunkStore::new()))?);
        engine.index_file(&hot).await?;

        let handle = engine.start_full_scan(ScanOptions::default()).unwrap();
        let writer = {
            let engine = Arc::clone(&engine);
            let hot = hot.clone();
            tokio::spawn(async move {
                for i in 0..30 {
                    let content = if i % 2 == 0 { HOT_ONE } else { HOT_TWO };
                    // Replace the file in one step so no reader sees a partial write
                    std::fs::write(&swap, content).unwrap();
                    std::fs::rename(&swap, &hot).unwrap();
                    engine.on_file_changed(&hot).await;
                }
            })
        };

        while !writer.is_finished() {
            assert_consistent(&engine).await;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        let report = handle.join().await;

        assert!(!report.cancelled);
        assert_eq!(report.errors, 0);
        assert_eq!(assert_consistent(&engine).await, HOT_TWO);
        Ok(())
    }
}
