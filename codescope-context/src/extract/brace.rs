//! Extraction for brace-delimited languages.
//!
//! Declarations are located with per-language regular expressions and their
//! bodies bounded by brace-depth counting that skips comments and string
//! literals. The scan is deliberately forgiving: an unbalanced block runs to
//! the end of the file, a header with no body is ignored.

use super::{ChunkExtractor, SKIPPED_MEMBER_NAMES, SourceFile, imports, skip_whitespace};
use crate::chunk::{ChunkType, CodeChunk};
use crate::language::Language;
use regex::Regex;
use std::sync::LazyLock;

/// Statement keywords that keyword-less patterns (`name(` forms) can mistake
/// for a declaration name. Patterns anchored on `function`, `fn` or `func`
/// are never screened.
const STATEMENT_KEYWORDS: &[&str] = &[
    "if", "else", "elif", "for", "foreach", "while", "do", "switch", "case", "catch", "try",
    "finally", "return", "throw", "typeof", "sizeof", "function", "func", "fn", "fun", "var",
    "let", "const", "await", "yield", "super", "this", "using", "lock", "synchronized", "with",
    "defer",
];

/// A declaration pattern. `bare` patterns carry no declaration keyword before
/// the name.
struct Pattern {
    regex: Regex,
    bare: bool,
}

/// Block syntax of one brace-delimited language.
struct BraceSyntax {
    functions: Vec<Pattern>,
    classes: Vec<Pattern>,
    methods: Vec<Pattern>,
    quotes: &'static [u8],
    /// `'` only opens a literal when it closes a single character (Rust lifetimes).
    char_literals: bool,
    hash_comments: bool,
    /// Whether `(` may appear between a class name and its opening brace.
    class_header_parens: bool,
    /// `fun f() = expr` style bodies end a header at a top-level `=`.
    expression_bodies: bool,
    /// Double-quoted strings may span lines.
    multiline_strings: bool,
}

impl BraceSyntax {
    fn new(functions: &[&str], classes: &[&str], methods: &[&str]) -> Self {
        Self {
            functions: compile(functions),
            classes: compile(classes),
            methods: compile(methods),
            quotes: b"\"'",
            char_literals: false,
            hash_comments: false,
            class_header_parens: true,
            expression_bodies: false,
            multiline_strings: false,
        }
    }

    fn quotes(mut self, quotes: &'static [u8]) -> Self {
        self.quotes = quotes;
        self
    }

    fn bare_functions(mut self) -> Self {
        self.functions.iter_mut().for_each(|p| p.bare = true);
        self
    }

    fn bare_methods(mut self) -> Self {
        self.methods.iter_mut().for_each(|p| p.bare = true);
        self
    }
}

fn compile(patterns: &[&str]) -> Vec<Pattern> {
    patterns
        .iter()
        .map(|pattern| Pattern {
            regex: Regex::new(pattern).expect("declaration pattern must compile"),
            bare: false,
        })
        .collect()
}

static JAVASCRIPT: LazyLock<BraceSyntax> = LazyLock::new(|| {
    BraceSyntax::new(
        &[
            r"\b(?:export\s+)?(?:default\s+)?(?:async\s+)?function\b\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^(]*?>)?\s*\(",
            r"\b(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:\([^()]*\)|[A-Za-z_$][\w$]*)\s*=>\s*\{",
        ],
        &[r"\b(?:export\s+)?(?:default\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)"],
        &[r"(?m)^[ \t]*(?:(?:static|async|get|set)\s+)*\*?(?P<name>[A-Za-z_$#][\w$]*)\s*\("],
    )
    .bare_methods()
    .quotes(b"\"'`")
});

static TYPESCRIPT: LazyLock<BraceSyntax> = LazyLock::new(|| {
    BraceSyntax::new(
        &[
            r"\b(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:async\s+)?function\b\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^(]*?>)?\s*\(",
            r"\b(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=;]+)?=\s*(?:async\s+)?(?:\([^()]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=;{]+)?=>\s*\{",
        ],
        &[r"\b(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface)\s+(?P<name>[A-Za-z_$][\w$]*)"],
        &[r"(?m)^[ \t]*(?:(?:public|private|protected|static|async|readonly|override|abstract|get|set)\s+)*\*?(?P<name>[A-Za-z_$#][\w$]*)\s*\??\s*(?:<[^(]*?>)?\s*\("],
    )
    .bare_methods()
    .quotes(b"\"'`")
});

static JAVA: LazyLock<BraceSyntax> = LazyLock::new(|| {
    BraceSyntax::new(
        &[],
        &[r"\b(?:(?:public|private|protected|static|final|abstract|sealed)\s+)*(?:class|interface|enum|record)\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"(?m)^[ \t]*(?:@\w+(?:\([^)]*\))?\s+)*(?:(?:public|private|protected|static|final|abstract|synchronized|native|default|strictfp)\s+)*(?:<[^>]*>\s+)?[\w<>\[\],.?]+\s+(?P<name>[A-Za-z_]\w*)\s*\("],
    )
    .bare_methods()
});

static CSHARP: LazyLock<BraceSyntax> = LazyLock::new(|| {
    BraceSyntax::new(
        &[],
        &[r"\b(?:(?:public|private|protected|internal|static|sealed|abstract|partial|readonly)\s+)*(?:class|interface|struct|record|enum)\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"(?m)^[ \t]*(?:(?:public|private|protected|internal|static|virtual|override|abstract|sealed|async|extern|unsafe|new|partial|readonly)\s+)*[\w<>\[\],.?]+\s+(?P<name>[A-Za-z_]\w*)\s*(?:<[^(]*?>)?\s*\("],
    )
    .bare_methods()
});

static C: LazyLock<BraceSyntax> = LazyLock::new(|| BraceSyntax {
    class_header_parens: false,
    ..BraceSyntax::new(
        &[r"(?m)^(?:[A-Za-z_][\w\*&]*[ \t\*&]+)+(?P<name>[A-Za-z_]\w*)\s*\("],
        &[r"\b(?:struct|union|enum)\s+(?P<name>[A-Za-z_]\w*)"],
        &[],
    )
    .bare_functions()
});

static CPP: LazyLock<BraceSyntax> = LazyLock::new(|| BraceSyntax {
    class_header_parens: false,
    ..BraceSyntax::new(
        &[r"(?m)^(?:template\s*<[^>]*>\s*)?(?:[A-Za-z_][\w\*&:<>,]*[ \t\*&]+)+(?P<name>[A-Za-z_~][\w:~]*)\s*\("],
        &[r"\b(?:class|struct|union)\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"(?m)^[ \t]*(?:(?:virtual|static|inline|explicit|constexpr|friend)\s+)*(?:[A-Za-z_][\w\*&:<>,]*[ \t\*&]+)+(?P<name>[A-Za-z_~]\w*)\s*\("],
    )
    .bare_functions()
    .bare_methods()
});

static GO: LazyLock<BraceSyntax> = LazyLock::new(|| {
    BraceSyntax::new(
        &[r"(?m)^func\s+(?:\((?P<receiver>[^)]*)\)\s*)?(?P<name>[A-Za-z_]\w*)\s*(?:\[[^\]]*\])?\s*\("],
        &[r"(?m)^type\s+(?P<name>[A-Za-z_]\w*)(?:\[[^\]]*\])?\s+(?:struct|interface)\b"],
        &[],
    )
    .quotes(b"\"'`")
});

static RUST: LazyLock<BraceSyntax> = LazyLock::new(|| {
    const FN: &str = r#"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe)\s+)*(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"#;
    BraceSyntax {
        char_literals: true,
        multiline_strings: true,
        ..BraceSyntax::new(
            &[FN],
            &[
                r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|trait|union)\s+(?P<name>[A-Za-z_]\w*)",
                r"(?m)^[ \t]*(?:unsafe\s+)?impl\b(?:\s*<[^{]*?>)?\s+(?:[^{;]*?\bfor\s+)?(?P<name>[A-Za-z_][\w:]*)",
            ],
            &[FN],
        )
    }
});

static PHP: LazyLock<BraceSyntax> = LazyLock::new(|| BraceSyntax {
    hash_comments: true,
    multiline_strings: true,
    ..BraceSyntax::new(
        &[r"\bfunction\s+&?(?P<name>[A-Za-z_]\w*)\s*\("],
        &[r"\b(?:(?:abstract|final)\s+)?(?:class|interface|trait|enum)\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"(?m)^[ \t]*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+&?(?P<name>[A-Za-z_]\w*)\s*\("],
    )
});

static KOTLIN: LazyLock<BraceSyntax> = LazyLock::new(|| BraceSyntax {
    expression_bodies: true,
    ..BraceSyntax::new(
        &[r"(?m)^[ \t]*(?:(?:public|private|internal|inline|suspend|operator|infix|tailrec)\s+)*fun\s+(?:<[^>]*>\s*)?(?:[\w.]+\.)?(?P<name>[A-Za-z_]\w*)\s*\("],
        &[r"\b(?:(?:data|sealed|abstract|open|enum|inner)\s+)*(?:class|interface|object)\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"(?m)^[ \t]*(?:(?:public|private|protected|internal|open|override|abstract|final|suspend|inline|operator)\s+)*fun\s+(?:<[^>]*>\s*)?(?P<name>[A-Za-z_]\w*)\s*\("],
    )
    .quotes(b"\"")
});

static SWIFT: LazyLock<BraceSyntax> = LazyLock::new(|| {
    BraceSyntax::new(
        &[r"\bfunc\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"\b(?:class|struct|protocol|extension|enum|actor)\s+(?P<name>[A-Za-z_]\w*)"],
        &[r"(?m)^[ \t]*(?:(?:@\w+|public|private|fileprivate|internal|open|static|class|override|final|mutating|nonmutating)\s+)*func\s+(?P<name>[A-Za-z_]\w*)"],
    )
    .quotes(b"\"")
});

fn syntax_for(language: Language) -> Option<&'static BraceSyntax> {
    let syntax: &'static LazyLock<BraceSyntax> = match language {
        Language::JavaScript => &JAVASCRIPT,
        Language::TypeScript => &TYPESCRIPT,
        Language::Java => &JAVA,
        Language::CSharp => &CSHARP,
        Language::C => &C,
        Language::Cpp => &CPP,
        Language::Go => &GO,
        Language::Rust => &RUST,
        Language::Php => &PHP,
        Language::Kotlin => &KOTLIN,
        Language::Swift => &SWIFT,
        Language::Python | Language::Unknown => return None,
    };
    Some(LazyLock::force(syntax))
}

/// Chunk extractor for C-style languages.
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceExtractor;

impl ChunkExtractor for BraceExtractor {
    fn extract(&self, file: &SourceFile<'_>) -> Vec<CodeChunk> {
        let Some(syntax) = syntax_for(file.language) else {
            return Vec::new();
        };
        let scanner = Scanner::new(file, syntax);

        let mut found = imports::extract_imports(file, |offset| !scanner.in_literal(offset));
        let class_spans = scanner.classes(&mut found);
        scanner.functions(&class_spans, &mut found);

        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, chunk)| chunk).collect()
    }
}

/// A regex hit for a declaration header.
struct Candidate {
    start: usize,
    /// Where to resume scanning for the opening brace.
    header_end: usize,
    /// Set when the pattern itself consumed the opening brace.
    open_brace: Option<usize>,
    name: String,
    receiver: Option<String>,
}

struct Scanner<'f, 'a> {
    file: &'f SourceFile<'a>,
    syntax: &'static BraceSyntax,
    bytes: &'a [u8],
    /// Sorted, non-overlapping byte ranges of comments and string literals.
    literals: Vec<(usize, usize)>,
}

impl<'f, 'a> Scanner<'f, 'a> {
    fn new(file: &'f SourceFile<'a>, syntax: &'static BraceSyntax) -> Self {
        let bytes = file.content.as_bytes();
        let mut literals = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match skip_literal(bytes, i, syntax) {
                Some(end) => {
                    literals.push((i, end));
                    i = end;
                }
                None => i += 1,
            }
        }
        Self {
            file,
            syntax,
            bytes,
            literals,
        }
    }

    fn in_literal(&self, offset: usize) -> bool {
        let idx = self.literals.partition_point(|&(start, _)| start <= offset);
        idx > 0 && offset < self.literals[idx - 1].1
    }

    fn candidates(&self, patterns: &[Pattern], from: usize, to: usize) -> Vec<Candidate> {
        let text = &self.file.content[from..to];
        let mut found: Vec<Candidate> = patterns
            .iter()
            .flat_map(|pattern| {
                pattern
                    .regex
                    .captures_iter(text)
                    .map(move |caps| (pattern.bare, caps))
            })
            .filter_map(|(bare, caps)| {
                let whole = caps.get(0)?;
                let name = caps.name("name")?;
                let start = skip_whitespace(self.bytes, from + whole.start());
                if self.in_literal(start) || (bare && STATEMENT_KEYWORDS.contains(&name.as_str())) {
                    return None;
                }
                Some(Candidate {
                    start,
                    header_end: from + name.end(),
                    open_brace: whole.as_str().ends_with('{').then(|| from + whole.end() - 1),
                    name: name.as_str().to_string(),
                    receiver: caps.name("receiver").map(|r| r.as_str().to_string()),
                })
            })
            .collect();
        found.sort_by_key(|candidate| candidate.start);
        found
    }

    /// Locate the block of a declaration, returning `(open_brace, end)`.
    fn block_of(
        &self,
        candidate: &Candidate,
        allow_parens: bool,
        stop_at_equals: bool,
    ) -> Option<(usize, usize)> {
        let open = match candidate.open_brace {
            Some(open) => open,
            None => find_block_open(
                self.bytes,
                candidate.header_end,
                self.syntax,
                allow_parens,
                stop_at_equals,
            )?,
        };
        Some((open, match_block(self.bytes, open, self.syntax)))
    }

    /// Emit class chunks and the methods inside them. Returns the class spans.
    fn classes(&self, found: &mut Vec<(usize, CodeChunk)>) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut cursor = 0;
        for candidate in self.candidates(&self.syntax.classes, 0, self.bytes.len()) {
            if candidate.start < cursor {
                continue;
            }
            let Some((open, end)) = self.block_of(&candidate, self.syntax.class_header_parens, false) else {
                continue;
            };
            let name = candidate
                .name
                .rsplit("::")
                .next()
                .unwrap_or(&candidate.name)
                .to_string();

            found.push((
                candidate.start,
                self.file.chunk(ChunkType::Class, candidate.start, end, name.as_str(), None),
            ));
            self.methods(&name, open + 1, end, found);
            spans.push((candidate.start, end));
            cursor = end;
        }
        spans
    }

    fn methods(&self, class_name: &str, body_start: usize, end: usize, found: &mut Vec<(usize, CodeChunk)>) {
        let body_end = if end > body_start && self.bytes[end - 1] == b'}' {
            end - 1
        } else {
            end
        };
        if body_start >= body_end {
            return;
        }

        let mut cursor = body_start;
        for candidate in self.candidates(&self.syntax.methods, body_start, body_end) {
            if candidate.start < cursor {
                continue;
            }
            let Some((_, method_end)) = self.block_of(&candidate, true, self.syntax.expression_bodies) else {
                continue;
            };
            cursor = method_end;

            let name = candidate.name.as_str();
            if SKIPPED_MEMBER_NAMES.contains(&name)
                || name == class_name
                || name.starts_with('~')
            {
                continue;
            }
            found.push((
                candidate.start,
                self.file.chunk(ChunkType::Method, candidate.start, method_end, name, Some(class_name)),
            ));
        }
    }

    /// Emit top-level functions, plus receiver and qualified methods declared
    /// outside a class body.
    fn functions(&self, class_spans: &[(usize, usize)], found: &mut Vec<(usize, CodeChunk)>) {
        let mut cursor = 0;
        for candidate in self.candidates(&self.syntax.functions, 0, self.bytes.len()) {
            if candidate.start < cursor
                || class_spans
                    .iter()
                    .any(|&(start, end)| candidate.start >= start && candidate.start < end)
            {
                continue;
            }
            let Some((_, end)) = self.block_of(&candidate, true, self.syntax.expression_bodies) else {
                continue;
            };
            cursor = end;

            let chunk = match (candidate.receiver.as_deref(), candidate.name.rsplit_once("::")) {
                (Some(receiver), _) => self.file.chunk(
                    ChunkType::Method,
                    candidate.start,
                    end,
                    candidate.name.as_str(),
                    Some(receiver_type(receiver)),
                ),
                (None, Some((class, method))) => {
                    let class = class.rsplit("::").next().unwrap_or(class);
                    if method == class || method.starts_with('~') {
                        continue;
                    }
                    self.file
                        .chunk(ChunkType::Method, candidate.start, end, method, Some(class))
                }
                (None, None) => {
                    self.file
                        .chunk(ChunkType::Function, candidate.start, end, candidate.name.as_str(), None)
                }
            };
            found.push((candidate.start, chunk));
        }
    }
}

/// `s *Server[T]` -> `Server`.
fn receiver_type(receiver: &str) -> &str {
    let ty = receiver.split_whitespace().last().unwrap_or(receiver);
    let ty = ty.trim_start_matches('*');
    ty.split('[').next().unwrap_or(ty)
}

/// If a comment or string literal starts at `i`, return the offset just past it.
fn skip_literal(bytes: &[u8], i: usize, syntax: &BraceSyntax) -> Option<usize> {
    let b = bytes[i];
    let next = bytes.get(i + 1).copied();

    if (b == b'/' && next == Some(b'/')) || (syntax.hash_comments && b == b'#') {
        let end = bytes[i..]
            .iter()
            .position(|&c| c == b'\n')
            .map_or(bytes.len(), |pos| i + pos);
        return Some(end);
    }
    if b == b'/' && next == Some(b'*') {
        let end = bytes[i + 2..]
            .windows(2)
            .position(|w| w == b"*/")
            .map_or(bytes.len(), |pos| i + 2 + pos + 2);
        return Some(end);
    }
    if b == b'\'' && syntax.char_literals {
        return char_literal_end(bytes, i);
    }
    if syntax.quotes.contains(&b) {
        let multiline = b == b'`' || (b == b'"' && syntax.multiline_strings);
        return Some(string_end(bytes, i, b, multiline));
    }
    None
}

/// End of a quoted string. Single-line strings stop at an unescaped newline.
fn string_end(bytes: &[u8], open: usize, quote: u8, multiline: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if !multiline => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// `'x'`, `'\n'`, `'é'`; anything else (a lifetime) is not a literal.
fn char_literal_end(bytes: &[u8], open: usize) -> Option<usize> {
    let first = *bytes.get(open + 1)?;
    if first == b'\\' {
        let close = bytes[open + 2..]
            .iter()
            .take(10)
            .position(|&c| c == b'\'')?;
        return Some(open + 2 + close + 1);
    }
    let width = match first {
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        b if b >= 0xC0 => 2,
        _ => 1,
    };
    (bytes.get(open + 1 + width) == Some(&b'\'')).then_some(open + 2 + width)
}

/// Find the `{` that opens the block of a header starting at `from`.
///
/// Balanced parentheses are skipped. The search gives up at a top-level `;`
/// or `}`, at a blank line, and at `(` when `allow_parens` is false.
fn find_block_open(
    bytes: &[u8],
    from: usize,
    syntax: &BraceSyntax,
    allow_parens: bool,
    stop_at_equals: bool,
) -> Option<usize> {
    let mut depth = 0usize;
    let mut blank_line = false;
    let mut i = from;
    while i < bytes.len() {
        if let Some(end) = skip_literal(bytes, i, syntax) {
            blank_line = false;
            i = end;
            continue;
        }
        match bytes[i] {
            b'(' if !allow_parens && depth == 0 => return None,
            b'(' => depth += 1,
            b')' => depth = depth.checked_sub(1)?,
            b'{' if depth == 0 => return Some(i),
            b';' | b'}' if depth == 0 => return None,
            b'=' if depth == 0 && stop_at_equals && bytes.get(i + 1) != Some(&b'>') => return None,
            b'\n' => {
                if blank_line {
                    return None;
                }
                blank_line = true;
            }
            c if !c.is_ascii_whitespace() => blank_line = false,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Offset just past the `}` matching the `{` at `open`, or end of input.
fn match_block(bytes: &[u8], open: usize, syntax: &BraceSyntax) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        if let Some(end) = skip_literal(bytes, i, syntax) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}
