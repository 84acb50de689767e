//! Documents exchanged between pipeline stages.
//!
//! Every type here is a plain serde document. The pipeline stages in
//! [`crate::checklist`], [`crate::manifest`], [`crate::ingest`],
//! [`crate::reconcile`] and [`crate::gate`] consume and produce these; the
//! [`crate::store`] persists them.
//!
//! # Versioning
//!
//! ```text
//! Checklist          (repo, issue)        v1 -> v2 -> ...   (issue edits)
//! ManifestRecord     (repo, pr, head)     active | superseded
//! ComplianceReport   (repo, pr)           v1 -> v2 -> ...   (CI runs, immutable)
//! ```

mod outcome;
mod report;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use outcome::{CiRunResults, MatchKey, OutcomeStatus, TestOutcome};
pub use report::{ComplianceReport, ItemStatus, ItemVerdict, MatchRule, MatchTarget, OutcomeMatch};

/// A repository coordinate plus the installation that grants access to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRef {
    /// `owner/name`.
    pub full_name: String,
    /// GitHub App installation id, when events carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
}

impl RepoRef {
    /// Creates a repository reference without an installation id.
    #[must_use]
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            installation_id: None,
        }
    }

    /// Sets the installation id.
    #[must_use]
    pub const fn with_installation(mut self, installation_id: u64) -> Self {
        self.installation_id = Some(installation_id);
        self
    }

    /// Returns the owner segment of `owner/name`.
    #[must_use]
    pub fn owner(&self) -> &str {
        self.full_name
            .split_once('/')
            .map_or(self.full_name.as_str(), |(owner, _)| owner)
    }

    /// Returns the name segment of `owner/name`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.full_name
            .split_once('/')
            .map_or(self.full_name.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Identifies a pull request across repositories, e.g. `octo/app#12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrId {
    /// `owner/name`.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl PrId {
    /// Creates a pull request id.
    #[must_use]
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// One acceptance criterion derived from an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// `C1..Cn`, assigned by order of first appearance.
    pub id: String,
    /// The criterion text as written in the issue.
    pub description: String,
    /// Whether the item counts towards the compliance score.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Keyword-derived categories.
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn default_required() -> bool {
    true
}

impl ChecklistItem {
    /// Returns the canonical id for the item at `index` (zero-based).
    #[must_use]
    pub fn id_for_index(index: usize) -> String {
        format!("C{}", index + 1)
    }
}

/// A versioned checklist for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    /// `owner/name`.
    pub repo: String,
    /// Issue number.
    pub issue_number: u64,
    /// Monotonic per (repo, issue), starting at 1.
    pub version: u32,
    /// Items in order of first appearance.
    pub items: Vec<ChecklistItem>,
    /// When this version was produced.
    pub created_at: DateTime<Utc>,
}

impl Checklist {
    /// Looks up an item by id.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Number of items that count towards the score.
    #[must_use]
    pub fn required_count(&self) -> usize {
        self.items.iter().filter(|item| item.required).count()
    }
}

/// Declaration kind recognized in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Free function.
    Function,
    /// Function declared inside another scope (indented).
    Method,
    /// Class declaration.
    Class,
    /// Struct, enum, trait, interface or type alias.
    Type,
}

impl SymbolKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Type => "type",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a file changed in a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// New file.
    Added,
    /// Edited in place.
    #[serde(alias = "changed")]
    Modified,
    /// Deleted.
    Removed,
    /// Moved, possibly with edits.
    Renamed,
    /// Copied from another path.
    Copied,
    /// Unchanged content (mode change only).
    Unchanged,
}

/// One entry of a pull request's changed-file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Path in the head commit.
    #[serde(alias = "filename")]
    pub path: String,
    /// Change status.
    pub status: FileStatus,
}

impl ChangedFile {
    /// Creates a changed-file entry.
    #[must_use]
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// A proposed test for one changed symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestManifestEntry {
    /// `T1..Tn`, unique within the manifest.
    pub test_id: String,
    /// `test_{symbol}_autoqa`.
    #[serde(rename = "name")]
    pub derived_name: String,
    /// Test framework chosen for the target file.
    pub framework: String,
    /// Changed file the test targets.
    #[serde(rename = "target")]
    pub target_file: String,
    /// Linked checklist item ids; empty entries do not affect the score.
    #[serde(rename = "checklist", default)]
    pub checklist_ids: Vec<String>,
    /// Declaration the test was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Kind of that declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
}

impl TestManifestEntry {
    /// Whether this entry contributes to any checklist item.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        !self.checklist_ids.is_empty()
    }
}

/// Proposed tests for one pull request head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestManifest {
    /// Pull request number.
    pub pr_number: u64,
    /// Head commit the manifest was generated for.
    pub head_sha: String,
    /// Entries in diff order.
    pub tests: Vec<TestManifestEntry>,
}

impl TestManifest {
    /// An empty manifest for a head commit.
    #[must_use]
    pub fn empty(pr_number: u64, head_sha: impl Into<String>) -> Self {
        Self {
            pr_number,
            head_sha: head_sha.into(),
            tests: Vec::new(),
        }
    }

    /// Looks up an entry by test id.
    #[must_use]
    pub fn entry(&self, test_id: &str) -> Option<&TestManifestEntry> {
        self.tests.iter().find(|entry| entry.test_id == test_id)
    }
}

/// Validation lifecycle of a pull request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Manifest stored, waiting for CI.
    Pending,
    /// A provider failure prevented fetching inputs or results.
    ResultsPending,
    /// Latest report scored 1.0 with no failed required item.
    Compliant,
    /// Latest report has failing or pending required items.
    NonCompliant,
    /// Merged by the gate.
    Merged,
}

impl ValidationStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ResultsPending => "results_pending",
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active state of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    /// `owner/name`.
    pub repo: String,
    /// Pull request number.
    pub pr_number: u64,
    /// Issue the pull request resolves, if one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_issue_id: Option<u64>,
    /// Current head commit.
    pub head_commit: String,
    /// Manifest for `head_commit`.
    pub manifest: TestManifest,
    /// Where validation stands.
    pub validation_status: ValidationStatus,
}

impl PullRequestRecord {
    /// Returns the cross-repository id.
    #[must_use]
    pub fn pr_id(&self) -> PrId {
        PrId::new(self.repo.clone(), self.pr_number)
    }
}

/// A stored manifest and whether a later head commit superseded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// The manifest.
    pub manifest: TestManifest,
    /// Head commit whose manifest replaced this one; equal to this
    /// manifest's own head when it was regenerated for the same commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// When the manifest was stored.
    pub recorded_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// Whether the manifest is still the active one for its pull request.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}
