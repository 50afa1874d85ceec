//! Relevance scoring of chunks against a free-text query.

use codescope_context::CodeChunk;

/// Keywords shorter than this are ignored.
const MIN_KEYWORD_LEN: usize = 3;

/// A parsed search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    /// Lowercased keywords in query order. A repeated word counts once per repeat.
    pub keywords: Vec<String>,
}

impl Query {
    /// Split on anything that is not alphanumeric or `_`, keeping words of
    /// three or more characters.
    pub fn parse(text: &str) -> Self {
        let keywords = text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
            .map(str::to_string)
            .collect();
        Self {
            text: text.to_string(),
            keywords,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Scores a chunk against a query. Scores are in `[0, 1]`.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &Query, chunk: &CodeChunk) -> f32;
}

/// Keyword frequency weighted by keyword length and normalized by chunk size.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl Scorer for KeywordScorer {
    fn score(&self, query: &Query, chunk: &CodeChunk) -> f32 {
        if chunk.content.is_empty() || query.is_empty() {
            return 0.0;
        }
        let content = chunk.content.to_lowercase();
        let raw: f32 = query
            .keywords
            .iter()
            .map(|keyword| {
                let occurrences = content.matches(keyword.as_str()).count();
                occurrences as f32 * keyword.chars().count() as f32 / 10.0
            })
            .sum();
        let size = content.chars().count() as f32 / 100.0;
        (raw / size).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_context::{ChunkMetadata, ChunkType};

    fn chunk(content: &str) -> CodeChunk {
        CodeChunk::new(
            "src/math.ts",
            "typescript",
            ChunkType::Function,
            content,
            ChunkMetadata::new("f", 1, 1),
        )
    }

    #[test]
    fn test_query_parsing() {
        let query = Query::parse("How do I add two numbers? add_numbers, ADD it");
        assert_eq!(
            query.keywords,
            vec!["how", "add", "two", "numbers", "add_numbers", "add"]
        );

        assert!(Query::parse("a to be").is_empty());
    }

    #[test]
    fn test_keyword_score() {
        let scorer = KeywordScorer;
        let query = Query::parse("add");

        // 1 occurrence * 3/10 over 100 chars / 100
        let content = format!("add{}", " ".repeat(97));
        let score = scorer.score(&query, &chunk(&content));
        assert!((score - 0.3).abs() < 1e-6, "score was {score}");

        // Case-insensitive, and small chunks saturate at 1.0
        assert_eq!(scorer.score(&query, &chunk("ADD(a, b)")), 1.0);

        assert_eq!(scorer.score(&query, &chunk("")), 0.0);
        assert_eq!(scorer.score(&query, &chunk("subtract")), 0.0);
        assert_eq!(scorer.score(&Query::parse("?"), &chunk("add")), 0.0);

        // Every keyword in the query contributes, repeats included
        let repeated = scorer.score(&Query::parse("add add"), &chunk(&content));
        assert!((repeated - 0.6).abs() < 1e-6, "score was {repeated}");
    }
}
