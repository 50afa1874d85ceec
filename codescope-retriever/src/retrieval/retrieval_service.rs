//! Keyword search over the chunk store and prompt augmentation.
//!
//! ```rust
//! use codescope_retriever::retrieval::retrieval_service::{RetrievalService, SearchOptions};
//! use codescope_retriever::storage::{ChunkStore, memory_store::MemoryChunkStore};
//! use codescope_context::{ChunkMetadata, ChunkType, CodeChunk};
//! use std::sync::Arc;
//!
//! # async fn example() -> codescope_retriever::error::Result<()> {
//! let store = Arc::new(MemoryChunkStore::new());
//! store
//!     .put(CodeChunk::new(
//!         "math.js",
//!         "javascript",
//!         ChunkType::Function,
//!         "function add(a, b) { return a + b; }",
//!         ChunkMetadata::new("add", 1, 1),
//!     ))
//!     .await?;
//!
//! let service = RetrievalService::new(store);
//! let results = service.search("add", &SearchOptions::default()).await?;
//! assert_eq!(results[0].chunk.metadata.name, "add");
//! # Ok(())
//! # }
//! ```

use super::scorer::{KeywordScorer, Query, Scorer};
use crate::error::Result;
use crate::storage::{ChunkFilter, ChunkStore};
use codescope_context::{CodeChunk, ContextItem};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Heading of the block appended by [`RetrievalService::augment_prompt`].
pub const AUGMENT_HEADER: &str = "Relevant code from the workspace:";

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Maximum number of results
    pub limit: usize,
    /// Minimum score, inclusive
    pub threshold: f32,
    pub filter: ChunkFilter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.05,
            filter: ChunkFilter::default(),
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_filter(mut self, filter: ChunkFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk: CodeChunk,
    pub score: f32,
}

/// A hit is not a selection: its lines go into the path label and it is
/// ordered by size alongside other non-selected items.
impl From<&SearchResult> for ContextItem {
    fn from(result: &SearchResult) -> Self {
        let chunk = &result.chunk;
        let (start, end) = chunk.line_range();
        ContextItem::new(
            format!("{}:{start}-{end}", chunk.file_path),
            chunk.content.clone(),
        )
        .with_language(chunk.language.clone())
    }
}

/// Ranks stored chunks against free-text queries.
pub struct RetrievalService {
    store: Arc<dyn ChunkStore>,
    scorer: Arc<dyn Scorer>,
}

impl RetrievalService {
    /// A service using the [`KeywordScorer`].
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self {
            store,
            scorer: Arc::new(KeywordScorer),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Score every chunk accepted by the filter and return the best ones,
    /// highest score first. Ties are ordered by path, then start line.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let query = Query::parse(query);
        if query.is_empty() {
            debug!("Query has no usable keywords");
            return Ok(Vec::new());
        }

        let chunks = self.store.list_chunks(&options.filter).await?;
        let candidates = chunks.len();
        let mut results: Vec<SearchResult> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = self.scorer.score(&query, &chunk);
                (score >= options.threshold).then_some(SearchResult { chunk, score })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.metadata.start_line.cmp(&b.chunk.metadata.start_line))
        });
        results.truncate(options.limit);
        debug!(
            "Query {:?} matched {} of {} chunks",
            query.keywords,
            results.len(),
            candidates
        );
        Ok(results)
    }

    /// Append the top `limit` hits for `query` to `prompt`.
    ///
    /// Returns the prompt unchanged when nothing matches or the store fails.
    pub async fn augment_prompt(
        &self,
        prompt: &str,
        query: &str,
        language: Option<&str>,
        limit: usize,
    ) -> String {
        let mut filter = ChunkFilter::default();
        if let Some(language) = language {
            filter = filter.with_language(language);
        }
        let options = SearchOptions::default()
            .with_limit(limit)
            .with_filter(filter);

        let results = match self.search(query, &options).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Search failed, leaving prompt unchanged: {}", e);
                return prompt.to_string();
            }
        };
        if results.is_empty() {
            return prompt.to_string();
        }

        let mut augmented = format!("{prompt}\n\n{AUGMENT_HEADER}\n");
        for result in &results {
            let chunk = &result.chunk;
            let _ = write!(
                augmented,
                "\n[Relevance: {}%] {}\n```{}\n{}\n```\n",
                (result.score * 100.0).round() as u32,
                chunk.file_path,
                chunk.language,
                chunk.content.trim_end()
            );
        }
        augmented
    }

    /// Search hits as assembler input.
    pub async fn context_items(&self, query: &str, options: &SearchOptions) -> Result<Vec<ContextItem>> {
        let results = self.search(query, options).await?;
        Ok(results.iter().map(ContextItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrieverError;
    use crate::storage::{StoreStats, memory_store::MemoryChunkStore};
    use async_trait::async_trait;
    use codescope_context::{ChunkMetadata, ChunkType};
    use tracing_test::traced_test;

    fn chunk(path: &str, language: &str, name: &str, content: &str, line: usize) -> CodeChunk {
        CodeChunk::new(
            path,
            language,
            ChunkType::Function,
            content,
            ChunkMetadata::new(name, line, line),
        )
    }

    async fn service(chunks: Vec<CodeChunk>) -> RetrievalService {
        let store = Arc::new(MemoryChunkStore::new());
        for c in chunks {
            store.put(c).await.unwrap();
        }
        RetrievalService::new(store)
    }

    #[tokio::test]
    async fn test_ordering_limit_and_threshold() -> Result<()> {
        let strong = "parse parse parse";
        let weak = format!("parse {}", "x".repeat(200));
        let service = service(vec![
            chunk("b.rs", "rust", "weak", &weak, 1),
            chunk("a.rs", "rust", "strong", strong, 1),
            chunk("c.rs", "rust", "none", "nothing to see here", 1),
        ])
        .await;

        let options = SearchOptions::default().with_threshold(0.0);
        let results = service.search("parse", &options).await?;
        let names: Vec<&str> = results.iter().map(|r| r.chunk.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["strong", "weak", "none"]);
        assert_eq!(results[0].score, 1.0);

        let results = service.search("parse", &options.clone().with_limit(1)).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.metadata.name, "strong");

        // weak scores 0.5 / 2.06 ~ 0.24
        let results = service
            .search("parse", &SearchOptions::default().with_threshold(0.3))
            .await?;
        assert_eq!(results.len(), 1);

        assert!(service.search("a b", &options).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ties_break_by_path_then_line() -> Result<()> {
        let service = service(vec![
            chunk("b.ts", "typescript", "b2", "render()", 9),
            chunk("b.ts", "typescript", "b1", "render() ", 2),
            chunk("a.ts", "typescript", "a", "render()  ", 5),
        ])
        .await;

        let results = service.search("render", &SearchOptions::default()).await?;
        let names: Vec<&str> = results.iter().map(|r| r.chunk.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b1", "b2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_augment_prompt_format() {
        let service = service(vec![
            chunk("math.py", "python", "add", "def add(a, b):\n    return a + b\n", 1),
            chunk("math.js", "javascript", "add", "function add(a, b) { return a + b; }", 1),
        ])
        .await;

        let augmented = service
            .augment_prompt("Explain this.", "add numbers", Some("python"), 3)
            .await;
        assert_eq!(
            augmented,
            "Explain this.\n\nRelevant code from the workspace:\n\n[Relevance: 94%] math.py\n```python\ndef add(a, b):\n    return a + b\n```\n"
        );

        let unchanged = service
            .augment_prompt("Explain this.", "subtract", None, 3)
            .await;
        assert_eq!(unchanged, "Explain this.");
    }

    #[tokio::test]
    async fn test_context_items_label_lines_without_a_selection() -> Result<()> {
        let service = service(vec![chunk("lib.go", "go", "Fetch", "func Fetch() {}", 7)]).await;
        let items = service
            .context_items("fetch", &SearchOptions::default())
            .await?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "lib.go:7-7");
        assert_eq!(items[0].language.as_deref(), Some("go"));
        assert_eq!(items[0].line_range(), None);
        assert_eq!(items[0].size, "func Fetch() {}".len());
        Ok(())
    }

    struct BrokenStore;

    #[async_trait]
    impl ChunkStore for BrokenStore {
        async fn put(&self, _chunk: CodeChunk) -> Result<String> {
            Err(RetrieverError::store("broken"))
        }
        async fn get(&self, _id: &str) -> Result<Option<CodeChunk>> {
            Err(RetrieverError::store("broken"))
        }
        async fn delete_by_file(&self, _file_path: &str) -> Result<usize> {
            Err(RetrieverError::store("broken"))
        }
        async fn list_by_file(&self, _file_path: &str) -> Result<Vec<CodeChunk>> {
            Err(RetrieverError::store("broken"))
        }
        async fn count(&self) -> Result<usize> {
            Err(RetrieverError::store("broken"))
        }
        async fn clear(&self) -> Result<()> {
            Err(RetrieverError::store("broken"))
        }
        async fn replace_file(&self, _file_path: &str, _chunks: Vec<CodeChunk>) -> Result<usize> {
            Err(RetrieverError::store("broken"))
        }
        async fn list_chunks(&self, _filter: &ChunkFilter) -> Result<Vec<CodeChunk>> {
            Err(RetrieverError::store("broken"))
        }
        async fn stats(&self) -> Result<StoreStats> {
            Err(RetrieverError::store("broken"))
        }
        async fn flush(&self) -> Result<()> {
            Err(RetrieverError::store("broken"))
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn test_store_failure_leaves_prompt_unchanged() {
        let service = RetrievalService::new(Arc::new(BrokenStore));
        assert!(service.search("anything", &SearchOptions::default()).await.is_err());

        let prompt = service.augment_prompt("Keep me", "anything", None, 5).await;
        assert_eq!(prompt, "Keep me");
        assert!(logs_contain("leaving prompt unchanged"));
    }
}
