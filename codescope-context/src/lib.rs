//! Chunking and context assembly for codescope.
//!
//! This crate holds everything that works on text alone: the [`CodeChunk`]
//! data model, language detection, the per-language [`extract`] heuristics
//! and the token-budgeted [`ContextAssembler`]. Storage, indexing and search
//! live in `codescope-retriever`.

pub mod assembler;
pub mod chunk;
pub mod extract;
pub mod language;

pub use assembler::{ContextAssembler, ContextItem, estimate_tokens};
pub use chunk::{ChunkMetadata, ChunkType, CodeChunk, chunk_id};
pub use extract::{ChunkExtractor, ExtractorRegistry, SourceFile};
pub use language::{Language, LanguageFamily};
