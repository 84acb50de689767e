//! Extension-keyed registries for declaration patterns and test frameworks.
//!
//! Both registries map a lowercase file extension to a value and fall back to
//! a default when the extension is unmapped. Defaults cover Python,
//! JavaScript, TypeScript, Rust, Go, Java, Kotlin and Ruby.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::ManifestError;
use crate::model::SymbolKind;

/// Framework used when no extension mapping exists.
pub const DEFAULT_FRAMEWORK: &str = "generic";

/// A declaration pattern. The regex must have a `name` capture group.
#[derive(Debug, Clone)]
pub struct SymbolPattern {
    regex: Regex,
    kind: SymbolKind,
}

impl SymbolPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidPattern`] when the regex does not
    /// compile and [`ManifestError::MissingNameGroup`] when it lacks a `name`
    /// group.
    pub fn new(pattern: &str, kind: SymbolKind) -> Result<Self, ManifestError> {
        let regex = Regex::new(pattern).map_err(|source| ManifestError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        if !regex.capture_names().flatten().any(|name| name == "name") {
            return Err(ManifestError::MissingNameGroup {
                pattern: pattern.to_string(),
            });
        }
        Ok(Self { regex, kind })
    }

    /// Returns the declared name and kind if `line` declares something.
    ///
    /// Indented functions are reported as methods.
    #[must_use]
    pub fn matches(&self, line: &str) -> Option<(String, SymbolKind)> {
        let captures = self.regex.captures(line)?;
        let name = captures.name("name")?.as_str().to_string();
        let indented = line.starts_with(|c: char| c.is_whitespace());
        let kind = match self.kind {
            SymbolKind::Function if indented => SymbolKind::Method,
            other => other,
        };
        Some((name, kind))
    }
}

/// `(extensions, [(pattern, kind)])` for the built-in languages.
const DEFAULT_PATTERNS: &[(&[&str], &[(&str, SymbolKind)])] = &[
    (
        &["py"],
        &[
            (
                r"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)\s*\(",
                SymbolKind::Function,
            ),
            (r"^\s*class\s+(?P<name>[A-Za-z_]\w*)", SymbolKind::Class),
        ],
    ),
    (
        &["js", "jsx", "mjs", "cjs", "ts", "tsx"],
        &[
            (
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)",
                SymbolKind::Function,
            ),
            (
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
                SymbolKind::Function,
            ),
            (
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\()",
                SymbolKind::Function,
            ),
            (
                r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)",
                SymbolKind::Class,
            ),
            (
                r"^\s*(?:export\s+)?(?:declare\s+)?(?:interface|type|enum)\s+(?P<name>[A-Za-z_$][\w$]*)",
                SymbolKind::Type,
            ),
        ],
    ),
    (
        &["rs"],
        &[
            (
                r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"#,
                SymbolKind::Function,
            ),
            (
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union|type)\s+(?P<name>[A-Za-z_]\w*)",
                SymbolKind::Type,
            ),
        ],
    ),
    (
        &["go"],
        &[
            (
                r"^func\s+\([^)]*\)\s*(?P<name>[A-Za-z_]\w*)",
                SymbolKind::Method,
            ),
            (r"^func\s+(?P<name>[A-Za-z_]\w*)", SymbolKind::Function),
            (
                r"^type\s+(?P<name>[A-Za-z_]\w*)\s+(?:struct|interface)\b",
                SymbolKind::Type,
            ),
        ],
    ),
    (
        &["java"],
        &[
            (
                r"^\s*(?:(?:public|protected|private|static|final|abstract|sealed)\s+)*(?:class|interface|enum|record)\s+(?P<name>[A-Za-z_]\w*)",
                SymbolKind::Class,
            ),
            (
                r"^\s*(?:public|protected|private)\s+(?:(?:static|final|synchronized|abstract)\s+)*[\w<>\[\],.? ]+\s+(?P<name>[A-Za-z_]\w*)\s*\(",
                SymbolKind::Method,
            ),
        ],
    ),
    (
        &["kt", "kts"],
        &[
            (
                r"^\s*(?:(?:public|private|internal|protected|override|suspend|inline|open|operator)\s+)*fun\s+(?:<[^>]+>\s*)?(?:[\w.]+\.)?(?P<name>[A-Za-z_]\w*)\s*\(",
                SymbolKind::Function,
            ),
            (
                r"^\s*(?:(?:public|private|internal|protected|data|open|sealed|abstract|enum)\s+)*(?:class|interface|object)\s+(?P<name>[A-Za-z_]\w*)",
                SymbolKind::Class,
            ),
        ],
    ),
    (
        &["rb"],
        &[
            (
                r"^\s*def\s+(?:self\.)?(?P<name>[A-Za-z_]\w*[?!]?)",
                SymbolKind::Function,
            ),
            (r"^\s*(?:class|module)\s+(?P<name>[A-Z]\w*)", SymbolKind::Class),
        ],
    ),
];

/// Patterns used for unmapped extensions.
const GENERIC_PATTERNS: &[(&str, SymbolKind)] = &[
    (
        r"^\s*(?:def|function|fn|func)\s+(?P<name>[A-Za-z_]\w*)",
        SymbolKind::Function,
    ),
    (r"^\s*class\s+(?P<name>[A-Za-z_]\w*)", SymbolKind::Class),
];

/// `(extensions, framework)` for the built-in languages.
const DEFAULT_FRAMEWORKS: &[(&[&str], &str)] = &[
    (&["py"], "pytest"),
    (&["js", "jsx", "mjs", "cjs", "ts", "tsx"], "jest"),
    (&["rs"], "cargo-test"),
    (&["go"], "go-test"),
    (&["java", "kt", "kts"], "junit"),
    (&["rb"], "rspec"),
];

fn compile(patterns: &[(&str, SymbolKind)]) -> Vec<SymbolPattern> {
    patterns
        .iter()
        .map(|(pattern, kind)| SymbolPattern::new(pattern, *kind).expect("static symbol pattern"))
        .collect()
}

static BUILTIN_SYMBOLS: LazyLock<SymbolRegistry> = LazyLock::new(|| {
    let mut by_extension = HashMap::new();
    for (extensions, patterns) in DEFAULT_PATTERNS {
        let compiled = compile(patterns);
        for extension in *extensions {
            by_extension.insert((*extension).to_string(), compiled.clone());
        }
    }
    SymbolRegistry {
        by_extension,
        fallback: compile(GENERIC_PATTERNS),
    }
});

/// Lowercase extension of `path`, if any.
#[must_use]
pub fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Declaration patterns keyed by file extension.
#[derive(Debug, Clone)]
pub struct SymbolRegistry {
    by_extension: HashMap<String, Vec<SymbolPattern>>,
    fallback: Vec<SymbolPattern>,
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        BUILTIN_SYMBOLS.clone()
    }
}

impl SymbolRegistry {
    /// Adds a pattern for an extension, ahead of the built-in ones.
    ///
    /// An extension that had no mapping stops using the generic fallback.
    ///
    /// # Errors
    ///
    /// Returns an error when the pattern is invalid.
    pub fn register(
        &mut self,
        extension: &str,
        pattern: &str,
        kind: SymbolKind,
    ) -> Result<(), ManifestError> {
        let pattern = SymbolPattern::new(pattern, kind)?;
        self.by_extension
            .entry(extension.trim_start_matches('.').to_ascii_lowercase())
            .or_default()
            .insert(0, pattern);
        Ok(())
    }

    /// Patterns that apply to `path`.
    #[must_use]
    pub fn patterns_for(&self, path: &str) -> &[SymbolPattern] {
        extension_of(path)
            .and_then(|ext| self.by_extension.get(&ext))
            .map_or(self.fallback.as_slice(), Vec::as_slice)
    }

    /// First declaration on `line`, using the patterns for `path`.
    #[must_use]
    pub fn declaration(&self, path: &str, line: &str) -> Option<(String, SymbolKind)> {
        self.patterns_for(path)
            .iter()
            .find_map(|pattern| pattern.matches(line))
    }
}

/// Test framework names keyed by file extension.
#[derive(Debug, Clone)]
pub struct FrameworkRegistry {
    by_extension: HashMap<String, String>,
    fallback: String,
}

impl Default for FrameworkRegistry {
    fn default() -> Self {
        let mut by_extension = HashMap::new();
        for (extensions, framework) in DEFAULT_FRAMEWORKS {
            for extension in *extensions {
                by_extension.insert((*extension).to_string(), (*framework).to_string());
            }
        }
        Self {
            by_extension,
            fallback: DEFAULT_FRAMEWORK.to_string(),
        }
    }
}

impl FrameworkRegistry {
    /// Maps an extension to a framework, replacing any previous mapping.
    pub fn register(&mut self, extension: &str, framework: impl Into<String>) {
        self.by_extension.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            framework.into(),
        );
    }

    /// Framework for `path`.
    #[must_use]
    pub fn framework_for(&self, path: &str) -> &str {
        extension_of(path)
            .and_then(|ext| self.by_extension.get(&ext))
            .map_or(self.fallback.as_str(), String::as_str)
    }
}

/// Whether `path` is itself a test file.
#[must_use]
pub fn is_test_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let in_test_dir = lower.split('/').rev().skip(1).any(|segment| {
        matches!(
            segment,
            "test" | "tests" | "__tests__" | "spec" | "specs" | "testdata"
        )
    });
    if in_test_dir {
        return true;
    }

    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_tests")
        || stem.ends_with("_spec")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || (stem.ends_with("test") && path.rsplit('/').next().is_some_and(is_java_style_test))
}

fn is_java_style_test(file_name: &str) -> bool {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    stem.len() > 4 && (stem.ends_with("Test") || stem.ends_with("Tests"))
}
