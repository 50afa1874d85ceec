//! Import/using statement extraction shared by every language family.

use super::SourceFile;
use crate::chunk::{ChunkType, CodeChunk};
use crate::language::Language;

/// Upper bound on continuation lines folded into one import statement.
const MAX_IMPORT_LINES: usize = 200;

const NAME_SKIP_TOKENS: &[&str] = &[
    "pub",
    "pub(crate)",
    "pub(super)",
    "import",
    "use",
    "using",
    "from",
    "static",
    "type",
    "extern",
    "crate",
    "#include",
    "include",
    "include_once",
    "require",
    "require_once",
    "namespace",
];

/// Whether a left-trimmed line starts an import statement in `language`.
pub fn is_import_statement(language: Language, line: &str) -> bool {
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| line.starts_with(p));
    match language {
        Language::JavaScript | Language::TypeScript => {
            starts(&["import ", "import{"])
                || (starts(&["const ", "let ", "var "]) && line.contains("require("))
        }
        Language::Java | Language::Kotlin | Language::Swift | Language::Go => {
            starts(&["import "])
        }
        Language::CSharp => {
            starts(&["using "]) && !starts(&["using var "]) && !line.contains('(')
        }
        Language::C => starts(&["#include", "# include"]),
        Language::Cpp => starts(&["#include", "# include", "using namespace ", "import "]),
        Language::Rust => starts(&[
            "use ",
            "pub use ",
            "pub(crate) use ",
            "pub(super) use ",
            "extern crate ",
        ]),
        Language::Php => starts(&["use ", "require ", "require_once", "include ", "include_once"]),
        Language::Python => {
            starts(&["import "]) || (starts(&["from "]) && line.contains(" import"))
        }
        Language::Unknown => false,
    }
}

/// Extract every import statement as its own chunk, keyed by byte offset.
///
/// Statements continue across lines while their brackets are unbalanced or
/// the line ends in a backslash. `is_code` lets callers reject lines that
/// start inside a comment or string.
pub fn extract_imports(
    file: &SourceFile<'_>,
    is_code: impl Fn(usize) -> bool,
) -> Vec<(usize, CodeChunk)> {
    let content = file.content;
    let lines = file.lines();
    let count = lines.line_count();
    let mut found = Vec::new();
    let mut idx = 0;

    while idx < count {
        let (start, end) = lines.line_span(idx, content);
        let line = &content[start..end];
        let trimmed = line.trim_start();
        let stmt_start = start + (line.len() - trimmed.len());

        if trimmed.is_empty()
            || !is_code(stmt_start)
            || !is_import_statement(file.language, trimmed)
        {
            idx += 1;
            continue;
        }

        let mut last = idx;
        let mut balance = bracket_balance(trimmed);
        let mut continued = trimmed.trim_end().ends_with('\\');
        while (balance > 0 || continued) && last + 1 < count && last - idx < MAX_IMPORT_LINES {
            last += 1;
            let (s, e) = lines.line_span(last, content);
            let next = &content[s..e];
            balance += bracket_balance(next);
            continued = next.trim_end().ends_with('\\');
        }

        let (_, last_end) = lines.line_span(last, content);
        let stmt_end = stmt_start + content[stmt_start..last_end].trim_end().len();
        let statement = &content[stmt_start..stmt_end];
        found.push((
            stmt_start,
            file.chunk(
                ChunkType::Import,
                stmt_start,
                stmt_end,
                import_name(statement),
                None,
            ),
        ));
        idx = last + 1;
    }

    found
}

fn bracket_balance(text: &str) -> i64 {
    text.bytes().fold(0, |acc, b| match b {
        b'(' | b'[' | b'{' => acc + 1,
        b')' | b']' | b'}' => acc - 1,
        _ => acc,
    })
}

/// Best-effort name of the imported module: the first quoted target if any,
/// otherwise the first path-like token after the keywords.
fn import_name(statement: &str) -> String {
    if let Some(quoted) = first_quoted(statement) {
        return quoted.to_string();
    }

    statement
        .split_whitespace()
        .find(|token| !NAME_SKIP_TOKENS.contains(token))
        .map(|token| {
            let token = token.split('{').next().unwrap_or(token);
            token
                .trim_end_matches([';', ',', '(', '\\'])
                .trim_end_matches("::")
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| statement.lines().next().unwrap_or_default().trim().to_string())
}

fn first_quoted(statement: &str) -> Option<&str> {
    let (open_idx, open) = statement
        .char_indices()
        .find(|(_, c)| matches!(c, '"' | '\'' | '`') || (*c == '<' && statement.starts_with('#')))?;
    let close = if open == '<' { '>' } else { open };
    let rest = &statement[open_idx + 1..];
    let close_idx = rest.find(close)?;
    Some(&rest[..close_idx])
}
