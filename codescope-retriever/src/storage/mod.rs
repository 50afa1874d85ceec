//! Storage abstraction for extracted code chunks
//!
//! The [`ChunkStore`] trait is the seam between indexing and retrieval: the
//! indexing engine writes whole files worth of chunks through
//! [`ChunkStore::replace_file`], the retrieval service reads snapshots through
//! [`ChunkStore::list_chunks`]. Stores are constructed explicitly and shared
//! behind an `Arc`.
//!
//! ## Key Components
//!
//! - **ChunkStore**: keyed chunk storage with a per-file secondary index
//! - **ChunkFilter**: narrows listings by language, chunk type and path prefix
//! - **MemoryChunkStore**: the in-memory implementation, optionally persisted as JSON
//!
//! ## Usage
//!
//! ```rust
//! use codescope_context::{ChunkMetadata, ChunkType, CodeChunk};
//! use codescope_retriever::storage::{ChunkStore, memory_store::MemoryChunkStore};
//!
//! # async fn example() -> codescope_retriever::error::Result<()> {
//! let store = MemoryChunkStore::new();
//! let chunk = CodeChunk::new(
//!     "src/lib.rs",
//!     "rust",
//!     ChunkType::Function,
//!     "fn answer() -> u32 { 42 }",
//!     ChunkMetadata::new("answer", 1, 1),
//! );
//! let id = store.put(chunk).await?;
//! assert_eq!(store.get(&id).await?.map(|c| c.metadata.name), Some("answer".to_string()));
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use async_trait::async_trait;
use codescope_context::{ChunkType, CodeChunk};
use serde::Serialize;
use std::collections::BTreeMap;

pub mod memory_store;

/// Query filter for chunk listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    pub language: Option<String>,
    pub chunk_types: Option<Vec<ChunkType>>,
    pub path_prefix: Option<String>,
}

impl ChunkFilter {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_chunk_types(mut self, chunk_types: Vec<ChunkType>) -> Self {
        self.chunk_types = Some(chunk_types);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, chunk: &CodeChunk) -> bool {
        self.language
            .as_deref()
            .is_none_or(|language| chunk.language.eq_ignore_ascii_case(language))
            && self
                .chunk_types
                .as_ref()
                .is_none_or(|types| types.contains(&chunk.chunk_type))
            && self
                .path_prefix
                .as_deref()
                .is_none_or(|prefix| chunk.file_path.starts_with(prefix))
    }
}

/// Aggregate counts over a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub file_count: usize,
    /// Chunk count per chunk type name
    pub by_type: BTreeMap<String, usize>,
}

/// Keyed storage for code chunks with a secondary index by file path.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Upsert a chunk by id, assigning the id if it is empty and stamping
    /// `last_updated`. Returns the id.
    async fn put(&self, chunk: CodeChunk) -> Result<String>;

    /// Get a specific chunk by id
    async fn get(&self, id: &str) -> Result<Option<CodeChunk>>;

    /// Delete every chunk of a file, returning how many were removed
    async fn delete_by_file(&self, file_path: &str) -> Result<usize>;

    /// All chunks of a file, ordered by start line
    async fn list_by_file(&self, file_path: &str) -> Result<Vec<CodeChunk>>;

    /// Total number of chunks
    async fn count(&self) -> Result<usize>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;

    /// Replace the chunk set of one file atomically with respect to readers.
    /// Returns the number of chunks inserted.
    async fn replace_file(&self, file_path: &str, chunks: Vec<CodeChunk>) -> Result<usize>;

    /// Snapshot of every chunk accepted by `filter`
    async fn list_chunks(&self, filter: &ChunkFilter) -> Result<Vec<CodeChunk>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Persist the current contents, if the store is backed by a file
    async fn flush(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_context::ChunkMetadata;

    fn chunk(path: &str, language: &str, chunk_type: ChunkType) -> CodeChunk {
        CodeChunk::new(path, language, chunk_type, "x", ChunkMetadata::new("x", 1, 1))
    }

    #[test]
    fn test_filter_matching() {
        let ts_fn = chunk("web/src/app.ts", "typescript", ChunkType::Function);
        let py_class = chunk("api/models.py", "python", ChunkType::Class);

        assert!(ChunkFilter::default().matches(&ts_fn));
        assert!(ChunkFilter::default().with_language("TypeScript").matches(&ts_fn));
        assert!(!ChunkFilter::default().with_language("python").matches(&ts_fn));

        let classes = ChunkFilter::default().with_chunk_types(vec![ChunkType::Class]);
        assert!(classes.matches(&py_class));
        assert!(!classes.matches(&ts_fn));

        let web = ChunkFilter::default()
            .with_path_prefix("web/")
            .with_chunk_types(vec![ChunkType::Function, ChunkType::Method]);
        assert!(web.matches(&ts_fn));
        assert!(!web.matches(&py_class));
    }
}
