//! Indexing configuration.
//!
//! [`IndexingEngineConfig`] can be built in code with the `with_*` builder
//! methods or loaded from a TOML file (by default `.codescope.toml` in the
//! first root). Every field has a default, so a config file only needs the
//! values it changes:
//!
//! ```toml
//! max_files = 2000
//! exclude_patterns = ["**/*.min.js", "generated/**"]
//! batch_size = 20
//! ```

use crate::error::{Result, RetrieverError};
use codescope_context::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-workspace config file looked up in the first root.
pub const CONFIG_FILE_NAME: &str = ".codescope.toml";

/// Directory, relative to the first root, that holds the persisted index.
pub const DATA_DIR_NAME: &str = ".codescope";

/// Directory names never descended into during discovery.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    DATA_DIR_NAME,
    "node_modules",
    "bower_components",
    "target",
    "dist",
    "build",
    "out",
    "bin",
    "obj",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".vscode",
];

/// Extensions indexed in addition to the languages with a dedicated extractor.
/// Files of these types only get the whole-file chunk.
const EXTRA_EXTENSIONS: &[&str] = &["rb", "lua", "sh", "scala"];

/// Configuration for the indexing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingEngineConfig {
    /// Workspace roots. Paths stored in chunks are relative to these.
    pub roots: Vec<PathBuf>,
    /// Upper bound on files indexed by one full scan, in discovery order
    pub max_files: usize,
    /// Glob patterns matched against root-relative paths
    pub exclude_patterns: Vec<String>,
    /// Extensions to index. Empty means the built-in set.
    pub extensions: Vec<String>,
    /// Files processed concurrently per batch
    pub batch_size: usize,
    /// Pause between batches, in milliseconds
    pub batch_delay_ms: u64,
    /// Files with more characters than this are skipped
    pub max_file_chars: usize,
    /// Where the chunk store is persisted. `None` keeps it in memory only.
    pub store_path: Option<PathBuf>,
    /// Flush the persisted store after this many mutations
    pub flush_every: usize,
}

impl Default for IndexingEngineConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from(".")],
            max_files: 5000,
            exclude_patterns: Vec::new(),
            extensions: Vec::new(),
            batch_size: 10,
            batch_delay_ms: 10,
            max_file_chars: 100_000,
            store_path: None,
            flush_every: 50,
        }
    }
}

impl IndexingEngineConfig {
    /// Create a configuration with defaults for a single workspace root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
            ..Self::default()
        }
    }

    /// Parse a TOML document. Relative paths are kept as written.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RetrieverError::config(e.to_string()))
    }

    /// Load a TOML config file. Relative roots and store paths are resolved
    /// against the directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RetrieverError::io(path, e))?;
        let mut config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or(Path::new("."));
        for root in &mut config.roots {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        if let Some(store_path) = &mut config.store_path {
            if store_path.is_relative() {
                *store_path = base.join(&*store_path);
            }
        }
        Ok(config)
    }

    /// Load `<root>/.codescope.toml` when present, otherwise defaults for `root`.
    /// A config file without `roots` indexes `root`.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::new(root));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| RetrieverError::io(&path, e))?;
        let has_roots = toml::from_str::<toml::Table>(&text)
            .map(|table| table.contains_key("roots"))
            .unwrap_or(false);
        let mut config = Self::load(&path)?;
        if !has_roots {
            config.roots = vec![root.to_path_buf()];
        }
        Ok(config)
    }

    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_file_chars(mut self, max_file_chars: usize) -> Self {
        self.max_file_chars = max_file_chars;
        self
    }

    pub fn with_store_path(mut self, store_path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(store_path.into());
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// The default persisted store location, `<first root>/.codescope/index.json`.
    pub fn default_store_path(&self) -> Option<PathBuf> {
        self.roots
            .first()
            .map(|root| root.join(DATA_DIR_NAME).join("index.json"))
    }

    /// Lowercased extensions that are indexed.
    pub fn effective_extensions(&self) -> Vec<String> {
        if self.extensions.is_empty() {
            Language::KNOWN
                .iter()
                .flat_map(|language| language.extensions().iter().copied())
                .chain(EXTRA_EXTENSIONS.iter().copied())
                .map(str::to_string)
                .collect()
        } else {
            self.extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        }
    }

    pub fn compiled_excludes(&self) -> Result<Vec<glob::Pattern>> {
        compile_patterns(&self.exclude_patterns)
    }

    /// Check the values that would make indexing misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(RetrieverError::config("at least one root is required"));
        }
        if self.batch_size == 0 {
            return Err(RetrieverError::config("batch_size must be at least 1"));
        }
        if self.flush_every == 0 {
            return Err(RetrieverError::config("flush_every must be at least 1"));
        }
        self.compiled_excludes()?;
        Ok(())
    }
}

pub(crate) fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            glob::Pattern::new(pattern).map_err(|e| {
                RetrieverError::config(format!("Invalid exclude pattern '{pattern}': {e}"))
            })
        })
        .collect()
}
