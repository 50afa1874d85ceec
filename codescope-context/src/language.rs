//! Language detection from file paths.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source languages with a dedicated extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Java,
    CSharp,
    C,
    Cpp,
    Go,
    Rust,
    Php,
    Kotlin,
    Swift,
    Python,
    /// Anything else. Only the whole-file chunk is produced.
    Unknown,
}

/// How a language delimits blocks, which decides the extractor used for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    Brace,
    Indent,
    Plain,
}

impl Language {
    pub const KNOWN: [Language; 12] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Java,
        Language::CSharp,
        Language::C,
        Language::Cpp,
        Language::Go,
        Language::Rust,
        Language::Php,
        Language::Kotlin,
        Language::Swift,
        Language::Python,
    ];

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "java" => Language::Java,
            "cs" => Language::CSharp,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "py" | "pyw" | "pyi" => Language::Python,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// File extensions that map to this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
            Language::Java => &["java"],
            Language::CSharp => &["cs"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
            Language::Go => &["go"],
            Language::Rust => &["rs"],
            Language::Php => &["php"],
            Language::Kotlin => &["kt", "kts"],
            Language::Swift => &["swift"],
            Language::Python => &["py", "pyw", "pyi"],
            Language::Unknown => &[],
        }
    }

    pub fn family(&self) -> LanguageFamily {
        match self {
            Language::Python => LanguageFamily::Indent,
            Language::Unknown => LanguageFamily::Plain,
            _ => LanguageFamily::Brace,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Python => "python",
            Language::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = std::convert::Infallible;

    /// Accepts language ids (`typescript`), common aliases (`ts`, `c#`) and
    /// bare extensions. Unrecognised names map to [`Language::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let language = match lower.as_str() {
            "javascript" | "javascriptreact" => Language::JavaScript,
            "typescript" | "typescriptreact" => Language::TypeScript,
            "csharp" | "c#" => Language::CSharp,
            "c++" => Language::Cpp,
            "golang" => Language::Go,
            other => Language::KNOWN
                .into_iter()
                .find(|language| language.as_str() == other)
                .unwrap_or_else(|| Language::from_extension(other)),
        };
        Ok(language)
    }
}
