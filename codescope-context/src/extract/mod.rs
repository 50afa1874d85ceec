//! Language-aware decomposition of source files into [`CodeChunk`]s.
//!
//! Extraction is heuristic: brace-delimited languages are scanned for
//! declaration patterns and their blocks bounded by brace-depth counting,
//! indentation-delimited languages are bounded by indentation. Every file
//! additionally yields one whole-file [`ChunkType::Other`] chunk so plain-text
//! search always has something to match.
//!
//! ## Key Components
//!
//! - **[`ChunkExtractor`]**: one implementation per language family, pluggable
//! - **[`ExtractorRegistry`]**: picks the extractor for a file and adds the
//!   whole-file chunk
//! - **[`SourceFile`]**: the text being decomposed plus offset-to-line lookup
//!
//! ```
//! use codescope_context::extract::ExtractorRegistry;
//! use codescope_context::language::Language;
//! use codescope_context::chunk::ChunkType;
//!
//! let registry = ExtractorRegistry::default();
//! let chunks = registry.extract(
//!     "function add(a,b){return a+b;} function sub(a,b){return a-b;}",
//!     Language::JavaScript,
//!     "src/math.js",
//! );
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[0].chunk_type, ChunkType::Other);
//! assert_eq!(chunks[1].metadata.name, "add");
//! assert_eq!(chunks[2].content, "function sub(a,b){return a-b;}");
//! ```

use crate::chunk::{ChunkMetadata, ChunkType, CodeChunk};
use crate::language::{Language, LanguageFamily};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub mod brace;
pub mod imports;
pub mod indent;

pub use brace::BraceExtractor;
pub use indent::IndentExtractor;

/// Names that carry no retrievable information as a method of their own.
pub(crate) const SKIPPED_MEMBER_NAMES: &[&str] = &[
    "constructor",
    "__construct",
    "__destruct",
    "__init__",
    "__new__",
    "__del__",
    "__post_init__",
    "init",
    "deinit",
    "render",
    "setUp",
    "tearDown",
    "componentDidMount",
    "componentDidUpdate",
    "componentWillUnmount",
    "connectedCallback",
    "disconnectedCallback",
    "ngOnInit",
    "ngOnChanges",
    "ngOnDestroy",
    "ngAfterViewInit",
];

/// A file being decomposed.
pub struct SourceFile<'a> {
    pub content: &'a str,
    pub language: Language,
    pub path: &'a str,
    lines: LineIndex,
}

impl<'a> SourceFile<'a> {
    pub fn new(content: &'a str, language: Language, path: &'a str) -> Self {
        Self {
            content,
            language,
            path,
            lines: LineIndex::new(content),
        }
    }

    pub fn lines(&self) -> &LineIndex {
        &self.lines
    }

    /// Build a chunk covering `content[start..end]`.
    pub fn chunk(
        &self,
        chunk_type: ChunkType,
        start: usize,
        end: usize,
        name: impl Into<String>,
        class_name: Option<&str>,
    ) -> CodeChunk {
        let start_line = self.lines.line_of(start);
        let end_line = if end > start {
            self.lines.line_of(end - 1)
        } else {
            start_line
        };
        let mut metadata = ChunkMetadata::new(name, start_line, end_line);
        if let Some(class_name) = class_name {
            metadata = metadata.with_class_name(class_name);
        }
        CodeChunk::new(
            self.path,
            self.language.as_str(),
            chunk_type,
            &self.content[start..end],
            metadata,
        )
    }
}

/// Byte offset to 1-based line number lookup.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            content
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            starts,
            len: content.len(),
        }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset).max(1)
    }

    /// Number of lines, counting a trailing partial line. Empty text has one line.
    pub fn line_count(&self) -> usize {
        match self.starts.last() {
            Some(&last) if last == self.len && self.starts.len() > 1 => self.starts.len() - 1,
            _ => self.starts.len(),
        }
    }

    /// Byte range of line `idx` (0-based), excluding the line terminator.
    pub fn line_span(&self, idx: usize, content: &str) -> (usize, usize) {
        let start = self.starts[idx];
        let mut end = self.starts.get(idx + 1).map(|s| s - 1).unwrap_or(self.len);
        if end > start && content.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
        (start, end)
    }
}

/// Decomposes one file into sub-chunks.
///
/// Implementations return only the structural chunks (imports, functions,
/// classes, methods); the whole-file chunk is added by the registry. They must
/// not panic on malformed input.
pub trait ChunkExtractor: Send + Sync {
    fn extract(&self, file: &SourceFile<'_>) -> Vec<CodeChunk>;
}

/// Routes files to extractors by language, falling back to language family.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_language: HashMap<Language, Arc<dyn ChunkExtractor>>,
    by_family: HashMap<LanguageFamily, Arc<dyn ChunkExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_family(LanguageFamily::Brace, Arc::new(BraceExtractor));
        registry.register_family(LanguageFamily::Indent, Arc::new(IndentExtractor));
        registry
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("languages", &self.by_language.keys().collect::<Vec<_>>())
            .field("families", &self.by_family.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExtractorRegistry {
    /// A registry that only produces whole-file chunks.
    pub fn empty() -> Self {
        Self {
            by_language: HashMap::new(),
            by_family: HashMap::new(),
        }
    }

    /// Override the extractor for one language.
    pub fn register_language(&mut self, language: Language, extractor: Arc<dyn ChunkExtractor>) {
        self.by_language.insert(language, extractor);
    }

    pub fn register_family(&mut self, family: LanguageFamily, extractor: Arc<dyn ChunkExtractor>) {
        self.by_family.insert(family, extractor);
    }

    fn extractor_for(&self, language: Language) -> Option<&Arc<dyn ChunkExtractor>> {
        self.by_language
            .get(&language)
            .or_else(|| self.by_family.get(&language.family()))
    }

    /// Decompose `content` into the whole-file chunk followed by structural chunks.
    pub fn extract(&self, content: &str, language: Language, path: &str) -> Vec<CodeChunk> {
        let file = SourceFile::new(content, language, path);
        let mut chunks = vec![whole_file_chunk(&file)];
        if let Some(extractor) = self.extractor_for(language) {
            chunks.extend(extractor.extract(&file));
        }
        chunks
    }

    /// Decompose a file, detecting its language from the extension.
    pub fn extract_path(&self, path: &Path, relative_path: &str, content: &str) -> Vec<CodeChunk> {
        self.extract(content, Language::from_path(path), relative_path)
    }
}

/// The whole-file fallback chunk.
pub fn whole_file_chunk(file: &SourceFile<'_>) -> CodeChunk {
    let name = file.path.rsplit('/').next().unwrap_or(file.path);
    let metadata = ChunkMetadata::new(name, 1, file.lines().line_count());
    CodeChunk::new(
        file.path,
        file.language.as_str(),
        ChunkType::Other,
        file.content,
        metadata,
    )
}

/// Advance past ASCII whitespace.
pub(crate) fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index() {
        let text = "a\nbb\n\nccc";
        let lines = LineIndex::new(text);
        assert_eq!(lines.line_of(0), 1);
        assert_eq!(lines.line_of(2), 2);
        assert_eq!(lines.line_of(5), 3);
        assert_eq!(lines.line_of(6), 4);
        assert_eq!(lines.line_count(), 4);
        assert_eq!(lines.line_span(1, text), (2, 4));

        assert_eq!(LineIndex::new("").line_count(), 1);
        assert_eq!(LineIndex::new("one\n").line_count(), 1);
        assert_eq!(LineIndex::new("one\r\ntwo").line_span(0, "one\r\ntwo"), (0, 3));
    }

    #[test]
    fn test_unknown_language_yields_only_whole_file() {
        let registry = ExtractorRegistry::default();
        let chunks = registry.extract("def hello\n  puts 'hi'\nend\n", Language::Unknown, "hello.rb");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Other);
        assert_eq!(chunks[0].metadata.name, "hello.rb");
        assert_eq!(chunks[0].line_range(), (1, 3));
    }

    #[test]
    fn test_empty_file_still_has_a_chunk() {
        let registry = ExtractorRegistry::default();
        let chunks = registry.extract("", Language::TypeScript, "src/empty.ts");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "");
        assert_eq!(chunks[0].line_range(), (1, 1));
    }

    struct FixedExtractor;

    impl ChunkExtractor for FixedExtractor {
        fn extract(&self, file: &SourceFile<'_>) -> Vec<CodeChunk> {
            vec![file.chunk(ChunkType::Function, 0, 3, "fixed", None)]
        }
    }

    #[test]
    fn test_language_override_takes_precedence() {
        let mut registry = ExtractorRegistry::default();
        registry.register_language(Language::Go, Arc::new(FixedExtractor));

        let chunks = registry.extract("func main() {}", Language::Go, "main.go");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata.name, "fixed");
        assert_eq!(chunks[1].content, "fun");

        let empty = ExtractorRegistry::empty();
        assert_eq!(empty.extract("func main() {}", Language::Go, "main.go").len(), 1);
    }
}
