//! Extraction for indentation-delimited languages (Python).

use super::{ChunkExtractor, SKIPPED_MEMBER_NAMES, SourceFile, imports};
use crate::chunk::{ChunkType, CodeChunk};
use regex::Regex;
use std::sync::LazyLock;

static DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)").expect("declaration pattern must compile"));
static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^class\s+(?P<name>[A-Za-z_]\w*)").expect("declaration pattern must compile"));

/// A header spanning more lines than this is treated as malformed.
const MAX_HEADER_LINES: usize = 50;
const TAB_WIDTH: usize = 4;

/// Chunk extractor that bounds blocks by indentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndentExtractor;

struct Line {
    start: usize,
    end: usize,
    /// Offset of the first non-whitespace character.
    text_start: usize,
    indent: usize,
    blank: bool,
    /// The line begins inside a triple-quoted string.
    in_docstring: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Scope<'a> {
    Class(&'a str),
    Function,
}

struct Open<'a> {
    indent: usize,
    last_line: usize,
    scope: Scope<'a>,
}

impl ChunkExtractor for IndentExtractor {
    fn extract(&self, file: &SourceFile<'_>) -> Vec<CodeChunk> {
        let lines = scan_lines(file);
        let mut found = imports::extract_imports(file, |offset| {
            let idx = file.lines().line_of(offset) - 1;
            lines.get(idx).is_none_or(|line| !line.in_docstring)
        });

        let mut stack: Vec<Open<'_>> = Vec::new();
        for idx in 0..lines.len() {
            let line = &lines[idx];
            if line.blank || line.in_docstring {
                continue;
            }
            let text = &file.content[line.text_start..line.end];
            let (is_class, name) = if let Some(caps) = CLASS_RE.captures(text) {
                (true, caps.name("name").map_or("", |m| m.as_str()))
            } else if let Some(caps) = DEF_RE.captures(text) {
                (false, caps.name("name").map_or("", |m| m.as_str()))
            } else {
                continue;
            };

            let Some(header_end) = header_end(file, &lines, idx) else {
                continue;
            };
            let last_line = block_end(&lines, idx, header_end);

            while stack
                .last()
                .is_some_and(|open| open.indent >= line.indent || open.last_line < idx)
            {
                stack.pop();
            }
            let parent = stack.last().map(|open| open.scope);

            let start_line = decorator_start(file, &lines, idx);
            let start = lines[start_line].text_start;
            let end = lines[last_line].end;

            let chunk = match (is_class, parent) {
                (_, Some(Scope::Function)) => None,
                (true, _) => Some(file.chunk(ChunkType::Class, start, end, name, None)),
                (false, Some(Scope::Class(class_name))) => (!SKIPPED_MEMBER_NAMES.contains(&name))
                    .then(|| file.chunk(ChunkType::Method, start, end, name, Some(class_name))),
                (false, None) => Some(file.chunk(ChunkType::Function, start, end, name, None)),
            };
            if let Some(chunk) = chunk {
                found.push((start, chunk));
            }

            stack.push(Open {
                indent: line.indent,
                last_line,
                scope: if is_class {
                    Scope::Class(name)
                } else {
                    Scope::Function
                },
            });
        }

        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, chunk)| chunk).collect()
    }
}

fn scan_lines(file: &SourceFile<'_>) -> Vec<Line> {
    let content = file.content;
    let index = file.lines();
    let mut docstring: Option<&str> = None;
    let mut lines = Vec::with_capacity(index.line_count());

    for idx in 0..index.line_count() {
        let (start, end) = index.line_span(idx, content);
        let raw = &content[start..end];
        let trimmed = raw.trim_start();
        let indent = raw[..raw.len() - trimmed.len()]
            .chars()
            .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
            .sum();

        lines.push(Line {
            start,
            end,
            text_start: end - trimmed.len(),
            indent,
            blank: trimmed.is_empty() || trimmed.starts_with('#'),
            in_docstring: docstring.is_some(),
        });

        let mut rest = raw;
        loop {
            let next = match docstring {
                Some(delimiter) => rest.find(delimiter).map(|pos| (pos, delimiter)),
                None => ["\"\"\"", "'''"]
                    .into_iter()
                    .filter_map(|d| rest.find(d).map(|pos| (pos, d)))
                    .min_by_key(|(pos, _)| *pos),
            };
            let Some((pos, delimiter)) = next else {
                break;
            };
            docstring = match docstring {
                Some(_) => None,
                None => Some(delimiter),
            };
            rest = &rest[pos + delimiter.len()..];
        }
    }
    lines
}

/// Last line of a (possibly multi-line) header, found by bracket balance.
fn header_end(file: &SourceFile<'_>, lines: &[Line], first: usize) -> Option<usize> {
    let mut balance = 0i64;
    for (idx, line) in lines.iter().enumerate().skip(first).take(MAX_HEADER_LINES) {
        for b in file.content[line.start..line.end].bytes() {
            match b {
                b'(' | b'[' | b'{' => balance += 1,
                b')' | b']' | b'}' => balance -= 1,
                _ => {}
            }
        }
        if balance <= 0 {
            return Some(idx);
        }
    }
    None
}

/// Last non-blank line indented deeper than the header at `first`.
fn block_end(lines: &[Line], first: usize, header_end: usize) -> usize {
    let indent = lines[first].indent;
    let mut last = header_end;
    for (idx, line) in lines.iter().enumerate().skip(header_end + 1) {
        if line.in_docstring {
            last = idx;
        } else if line.blank {
            continue;
        } else if line.indent > indent {
            last = idx;
        } else {
            break;
        }
    }
    last
}

/// First line of the decorator stack directly above `idx`.
fn decorator_start(file: &SourceFile<'_>, lines: &[Line], idx: usize) -> usize {
    let mut start = idx;
    while start > 0 {
        let prev = &lines[start - 1];
        let text = &file.content[prev.text_start..prev.end];
        if prev.in_docstring || prev.indent != lines[idx].indent || !text.starts_with('@') {
            break;
        }
        start -= 1;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    const SAMPLE: &str = r#"import os
from typing import List


class Greeter:
    """Says hello.

    def not_a_method(self):
    """

    def __init__(self, name):
        self.name = name

    @staticmethod
    def greet(name: str) -> str:
        message = f"hi {name}"

        return message


def helper(
    a,
    b,
):
    def inner():
        return a
    return inner()


async def fetch():
    pass
"#;

    fn extract(text: &str) -> Vec<CodeChunk> {
        IndentExtractor.extract(&SourceFile::new(text, Language::Python, "pkg/greeter.py"))
    }

    #[test]
    fn test_python_structure() {
        let chunks = extract(SAMPLE);
        let summary: Vec<_> = chunks
            .iter()
            .map(|c| (c.chunk_type, c.metadata.name.as_str(), c.line_range()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChunkType::Import, "os", (1, 1)),
                (ChunkType::Import, "typing", (2, 2)),
                (ChunkType::Class, "Greeter", (5, 18)),
                (ChunkType::Method, "greet", (14, 18)),
                (ChunkType::Function, "helper", (21, 27)),
                (ChunkType::Function, "fetch", (30, 31)),
            ]
        );
    }

    #[test]
    fn test_method_content_and_class_name() {
        let chunks = extract(SAMPLE);
        let greet = chunks
            .iter()
            .find(|c| c.metadata.name == "greet")
            .unwrap();
        assert_eq!(greet.metadata.class_name.as_deref(), Some("Greeter"));
        assert!(greet.content.starts_with("@staticmethod\n    def greet"));
        assert!(greet.content.ends_with("return message"));
        assert_eq!(greet.file_path, "pkg/greeter.py");
        assert_eq!(greet.language, "python");
    }

    #[test]
    fn test_one_line_def_and_unterminated_header() {
        let chunks = extract("def one(): return 1\ndef broken(a,\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "def one(): return 1");
        assert_eq!(chunks[0].line_range(), (1, 1));
    }

    #[test]
    fn test_tabs_count_as_indentation() {
        let chunks = extract("class A:\n\tdef run(self):\n\t\treturn 1\n\ndef after():\n\tpass\n");
        let names: Vec<_> = chunks
            .iter()
            .map(|c| (c.chunk_type, c.metadata.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                (ChunkType::Class, "A"),
                (ChunkType::Method, "run"),
                (ChunkType::Function, "after"),
            ]
        );
        assert_eq!(chunks[0].line_range(), (1, 3));
    }
}
