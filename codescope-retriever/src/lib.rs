//! codescope-retriever: workspace indexing and keyword retrieval of code chunks
//!
//! This crate keeps an index of structural code chunks (functions, classes,
//! methods, imports and whole files) in sync with a workspace, and answers
//! relevance-ranked queries against it. Chunk extraction and context assembly
//! live in `codescope-context`.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: indexing engine, file watcher, scoring and search
//! - **[`storage`]**: chunk store abstraction with an in-memory implementation
//! - **[`config`]**: indexing configuration, loadable from `.codescope.toml`
//! - **[`error`]**: the crate's error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codescope_retriever::config::IndexingEngineConfig;
//! use codescope_retriever::retrieval::{
//!     indexing_engine::{IndexingEngine, ScanOptions},
//!     retrieval_service::{RetrievalService, SearchOptions},
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = Arc::new(IndexingEngine::open(IndexingEngineConfig::new(".")).await?);
//! if let Some(scan) = engine.start_full_scan(ScanOptions::default()) {
//!     let report = scan.join().await;
//!     println!("indexed {} files", report.files_indexed);
//! }
//!
//! let service = RetrievalService::new(Arc::clone(engine.store()));
//! for hit in service.search("parse config", &SearchOptions::default()).await? {
//!     println!("{:.2} {}", hit.score, hit.chunk.file_path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Files → IndexingEngine → ExtractorRegistry → ChunkStore → RetrievalService → ContextAssembler
//!   ↑           ↑
//! DirectoryWatcher
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;
