//! Chunk data model shared by the extractors, the store and the retriever.
//!
//! A [`CodeChunk`] is a contiguous slice of one file's source text. Chunks are
//! identified by a hash of their path, kind and content so that re-extracting
//! an unchanged file yields the same ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of hex characters kept from the blake3 digest for chunk ids.
pub const CHUNK_ID_HEX_LEN: usize = 16;

/// Kind of source construct a chunk was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Import,
    /// Whole-file fallback chunk, and anything without a dedicated extractor.
    Other,
}

impl ChunkType {
    pub const ALL: [ChunkType; 5] = [
        ChunkType::Function,
        ChunkType::Class,
        ChunkType::Method,
        ChunkType::Import,
        ChunkType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Import => "import",
            ChunkType::Other => "other",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "function" | "fn" => Ok(ChunkType::Function),
            "class" => Ok(ChunkType::Class),
            "method" => Ok(ChunkType::Method),
            "import" => Ok(ChunkType::Import),
            "other" | "file" => Ok(ChunkType::Other),
            _ => Err(format!(
                "Invalid chunk type: '{s}'. Valid values are: function, class, method, import, other"
            )),
        }
    }
}

/// Metadata attached to every chunk.
///
/// Lines are 1-based and inclusive. `extra` is an open bag for extractors
/// that want to record more than the common fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    pub fn new(name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line,
            class_name: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }
}

/// A decomposed unit of source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Content-derived id. Empty until assigned by [`CodeChunk::ensure_id`] or the store.
    #[serde(default)]
    pub id: String,
    pub content: String,
    /// Workspace-relative, `/`-separated path of the owning file.
    pub file_path: String,
    pub language: String,
    pub chunk_type: ChunkType,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CodeChunk {
    /// Create a chunk with a blank id and no timestamp.
    pub fn new(
        file_path: impl Into<String>,
        language: impl Into<String>,
        chunk_type: ChunkType,
        content: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            id: String::new(),
            content: content.into(),
            file_path: file_path.into(),
            language: language.into(),
            chunk_type,
            metadata,
            last_updated: None,
        }
    }

    /// Assign the deterministic id if none has been set yet.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = chunk_id(&self.file_path, self.chunk_type, &self.content);
        }
        &self.id
    }

    pub fn line_range(&self) -> (usize, usize) {
        (self.metadata.start_line, self.metadata.end_line)
    }
}

/// Deterministic chunk id for `(file_path, chunk_type, content)`.
///
/// The chunk type is part of the key, so a file made of a single declaration
/// keeps both its whole-file chunk and its function chunk.
///
/// ```
/// use codescope_context::chunk::{ChunkType, chunk_id};
///
/// let source = "function add(a, b) { return a + b; }";
/// let a = chunk_id("src/math.ts", ChunkType::Function, source);
/// let b = chunk_id("src/math.ts", ChunkType::Function, source);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 16);
/// assert_ne!(a, chunk_id("src/other.ts", ChunkType::Function, source));
/// assert_ne!(a, chunk_id("src/math.ts", ChunkType::Other, source));
/// ```
pub fn chunk_id(file_path: &str, chunk_type: ChunkType, content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(chunk_type.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(content.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..CHUNK_ID_HEX_LEN].to_string()
}
