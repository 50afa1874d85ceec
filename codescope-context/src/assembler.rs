//! Token-budgeted assembly of prompt context.
//!
//! Token counts here are estimates: `ceil(words * 1.3)`. They are not what a
//! model tokenizer would report, so callers that need a hard limit should
//! leave headroom.

use serde::{Deserialize, Serialize};

pub const TRUNCATION_MARKER: &str = "... [truncated]";
pub const OMISSION_MARKER: &str = "[additional context omitted]";

/// Estimated token cost of `text`.
///
/// ```
/// use codescope_context::assembler::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("fn main() {}"), 4);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 13).div_ceil(10)
}

/// One candidate piece of context: a selection, an open file, a search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    pub path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    /// Ordering key for items without a line range. Defaults to the content length.
    pub size: usize,
}

impl ContextItem {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size: content.len(),
            content,
            language: None,
            line_start: None,
            line_end: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_lines(mut self, start: usize, end: usize) -> Self {
        self.line_start = Some(start);
        self.line_end = Some(end);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn line_range(&self) -> Option<(usize, usize)> {
        self.line_start.zip(self.line_end)
    }
}

/// Builds one prompt-ready string from context items under a token budget.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    /// Fraction of the budget after which no further item is placed.
    pub fill_ratio: f64,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self { fill_ratio: 0.95 }
    }
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble `items` into at most roughly `max_tokens` estimated tokens.
    ///
    /// Items with a line range come first (in input order), the rest by
    /// ascending size. Every item gets an even share of the budget, fixed up
    /// front and never above the fill limit; an item over its share is
    /// truncated. Once the next block would push the total past
    /// `fill_ratio * max_tokens`, assembly stops and [`OMISSION_MARKER`] is
    /// appended.
    pub fn build(&self, items: &[ContextItem], max_tokens: usize) -> String {
        if items.is_empty() {
            return String::new();
        }

        let mut ordered: Vec<&ContextItem> = items.iter().collect();
        ordered.sort_by_key(|item| match item.line_range() {
            Some(_) => (0, 0),
            None => (1, item.size),
        });

        let limit = (max_tokens as f64 * self.fill_ratio).floor() as usize;
        let share = (max_tokens / ordered.len()).min(limit);

        let mut blocks = Vec::with_capacity(ordered.len());
        let mut total = 0;
        for item in ordered {
            let mut block = render(item, &item.content, false);
            let mut tokens = estimate_tokens(&block);
            if tokens > share {
                block = truncate_to(item, share, tokens);
                tokens = estimate_tokens(&block);
            }
            if total + tokens > limit {
                blocks.push(OMISSION_MARKER.to_string());
                break;
            }
            total += tokens;
            blocks.push(block);
        }

        blocks.join("\n\n")
    }
}

fn render(item: &ContextItem, content: &str, truncated: bool) -> String {
    let mut block = format!("File: {}\n", item.path);
    if let Some(language) = &item.language {
        block.push_str(&format!("Language: {language}\n"));
    }
    if let Some((start, end)) = item.line_range() {
        block.push_str(&format!("Lines: {start}-{end}\n"));
    }
    block.push_str("```");
    block.push_str(item.language.as_deref().unwrap_or_default());
    block.push('\n');
    block.push_str(content.trim_end());
    if truncated {
        block.push('\n');
        block.push_str(TRUNCATION_MARKER);
    }
    block.push_str("\n```");
    block
}

/// Cut content by the ratio `share / tokens`, then back off to whitespace
/// boundaries until the rendered block fits.
fn truncate_to(item: &ContextItem, share: usize, tokens: usize) -> String {
    let content = item.content.as_str();
    let keep_chars = (content.chars().count() as f64 * share as f64 / tokens as f64) as usize;
    let mut cut = content
        .char_indices()
        .nth(keep_chars)
        .map_or(content.len(), |(idx, _)| idx);

    loop {
        let block = render(item, &content[..cut], true);
        if cut == 0 || estimate_tokens(&block) <= share {
            return block;
        }
        cut = content[..cut]
            .trim_end()
            .rfind(char::is_whitespace)
            .unwrap_or(0);
    }
}
