//! Pull request diff to proposed test manifest.
//!
//! # Architecture
//!
//! ```text
//! unified diff ──► parse_unified_diff ──► extract_symbols ──► propose ──► link
//!                  (per-file changed      (SymbolRegistry)   (T1..Tn,    (Tokenizer,
//!                   text, diff order)                         Framework-  checklist)
//!                                                             Registry)
//! ```
//!
//! # Contracts
//!
//! - Entries follow file order in the diff, then first appearance of the
//!   symbol within the file.
//! - Removed files and test files produce no entries.
//! - Entries with no linked checklist item are kept; they do not affect the
//!   score.
//! - Generation is pure: identical inputs yield identical manifests.

mod diff;
mod linkage;
mod registry;


use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

pub use diff::{DiffFile, parse_unified_diff};
pub use linkage::{LinkHints, entry_tokens, find_linked_issue, link_entry};
pub use registry::{
    DEFAULT_FRAMEWORK, FrameworkRegistry, SymbolPattern, SymbolRegistry, extension_of, is_test_file,
};

use crate::model::{ChangedFile, Checklist, FileStatus, SymbolKind, TestManifest, TestManifestEntry};
use crate::text::{Tokenizer, sanitize_identifier};

/// Suffix of every derived test name.
pub const TEST_NAME_SUFFIX: &str = "_autoqa";

/// Errors raised while configuring manifest generation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// A symbol pattern failed to compile.
    #[error("invalid symbol pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler error.
        source: regex::Error,
    },

    /// A symbol pattern has no `name` capture group.
    #[error("symbol pattern {pattern:?} has no `name` capture group")]
    MissingNameGroup {
        /// The offending pattern.
        pattern: String,
    },
}

/// A declaration added or modified in a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolChange {
    /// File the declaration lives in.
    pub file: String,
    /// Declared name.
    pub symbol: String,
    /// Declaration kind.
    pub kind: SymbolKind,
}

/// Derived test name for a symbol: `test_{sanitized}_autoqa`.
#[must_use]
pub fn derived_test_name(symbol: &str) -> String {
    format!("test_{}{TEST_NAME_SUFFIX}", sanitize_identifier(symbol))
}

/// Inputs for one manifest.
#[derive(Debug, Clone, Copy)]
pub struct ManifestInput<'a> {
    /// Pull request number.
    pub pr_number: u64,
    /// Head commit the diff belongs to.
    pub head_sha: &'a str,
    /// Unified diff of the pull request.
    pub diff: &'a str,
    /// Changed-file list reported by the provider.
    pub files: &'a [ChangedFile],
    /// Checklist of the linked issue, if any.
    pub checklist: Option<&'a Checklist>,
}

/// Pure manifest generator.
#[derive(Debug, Clone, Default)]
pub struct ManifestGenerator {
    symbols: SymbolRegistry,
    frameworks: FrameworkRegistry,
    tokenizer: Tokenizer,
}

impl ManifestGenerator {
    /// Creates a generator from explicit registries and tokenizer.
    #[must_use]
    pub const fn new(
        symbols: SymbolRegistry,
        frameworks: FrameworkRegistry,
        tokenizer: Tokenizer,
    ) -> Self {
        Self {
            symbols,
            frameworks,
            tokenizer,
        }
    }

    /// Tokenizer used for linkage.
    #[must_use]
    pub const fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Phase 1: declarations added or modified in the diff.
    ///
    /// Files reported as removed, deleted in the diff, or recognized as test
    /// files are skipped. Each symbol appears once per file.
    #[must_use]
    pub fn extract_symbols(&self, diff: &str, files: &[ChangedFile]) -> Vec<SymbolChange> {
        let removed: HashSet<&str> = files
            .iter()
            .filter(|file| file.status == FileStatus::Removed)
            .map(|file| file.path.as_str())
            .collect();

        let mut changes = Vec::new();
        for file in parse_unified_diff(diff) {
            if file.deleted || removed.contains(file.path.as_str()) || is_test_file(&file.path) {
                continue;
            }
            let mut seen = HashSet::new();
            for line in &file.changed_lines {
                let Some((symbol, kind)) = self.symbols.declaration(&file.path, line) else {
                    continue;
                };
                if seen.insert(symbol.clone()) {
                    changes.push(SymbolChange {
                        file: file.path.clone(),
                        symbol,
                        kind,
                    });
                }
            }
        }
        changes
    }

    /// Runs all three phases.
    #[must_use]
    pub fn generate(&self, input: &ManifestInput<'_>) -> TestManifest {
        let changes = self.extract_symbols(input.diff, input.files);

        let mut tests: Vec<TestManifestEntry> = changes
            .into_iter()
            .enumerate()
            .map(|(index, change)| TestManifestEntry {
                test_id: format!("T{}", index + 1),
                derived_name: derived_test_name(&change.symbol),
                framework: self.frameworks.framework_for(&change.file).to_string(),
                target_file: change.file,
                checklist_ids: Vec::new(),
                symbol: Some(change.symbol),
                kind: Some(change.kind),
            })
            .collect();

        if let Some(checklist) = input.checklist {
            for entry in &mut tests {
                entry.checklist_ids = link_entry(entry, checklist, &self.tokenizer);
            }
            if tests.is_empty() {
                tests = self.checklist_entries(checklist, input);
            }
        }

        tracing::debug!(
            pr_number = input.pr_number,
            head_sha = %input.head_sha,
            entries = tests.len(),
            linked = tests.iter().filter(|entry| entry.is_linked()).count(),
            "generated test manifest"
        );

        TestManifest {
            pr_number: input.pr_number,
            head_sha: input.head_sha.to_string(),
            tests,
        }
    }

    /// Generic entries for checklist items that ask for tests, used when the
    /// diff yields no symbol.
    fn checklist_entries(
        &self,
        checklist: &Checklist,
        input: &ManifestInput<'_>,
    ) -> Vec<TestManifestEntry> {
        let target = input
            .files
            .iter()
            .find(|file| file.status != FileStatus::Removed)
            .map_or("unknown", |file| file.path.as_str());

        checklist
            .items
            .iter()
            .filter(|item| item.description.to_lowercase().contains("test"))
            .enumerate()
            .map(|(index, item)| TestManifestEntry {
                test_id: format!("T{}", index + 1),
                derived_name: format!(
                    "test_checklist_item_{}{TEST_NAME_SUFFIX}",
                    item.id.to_lowercase()
                ),
                framework: self.frameworks.framework_for(target).to_string(),
                target_file: target.to_string(),
                checklist_ids: vec![item.id.clone()],
                symbol: None,
                kind: None,
            })
            .collect()
    }
}
