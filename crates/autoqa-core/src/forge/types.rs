//! Provider-agnostic data shapes for issues, pull requests and CI runs.

use serde::{Deserialize, Serialize};

/// Issue as fetched from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSnapshot {
    /// Issue number.
    pub number: u64,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body markdown; empty when the issue has none.
    #[serde(default)]
    pub body: String,
    /// Label names.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Pull request as fetched from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    /// Pull request number.
    pub number: u64,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body markdown.
    #[serde(default)]
    pub body: String,
    /// Current head commit.
    pub head_sha: String,
    /// Head branch name.
    #[serde(default)]
    pub head_ref: String,
    /// Base branch name.
    #[serde(default)]
    pub base_ref: String,
    /// Label names.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Whether the pull request is merged.
    #[serde(default)]
    pub merged: bool,
}

/// An issue or pull request comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Provider comment id.
    pub id: u64,
    /// Body markdown.
    pub body: String,
}

/// Check-run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    /// Waiting for results.
    InProgress,
    /// Concluded.
    Completed,
}

impl CheckRunStatus {
    /// Returns the API representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    /// Every required item passed.
    Success,
    /// A required item failed.
    Failure,
    /// Required items are still pending.
    Neutral,
}

impl CheckConclusion {
    /// Returns the API representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
        }
    }
}

/// Title and markdown summary shown on a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    /// One-line title.
    pub title: String,
    /// Markdown summary.
    pub summary: String,
}

/// Create or update request for a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunRequest {
    /// Check name.
    pub name: String,
    /// Commit the check is attached to.
    pub head_sha: String,
    /// Lifecycle state.
    pub status: CheckRunStatus,
    /// Conclusion, when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<CheckConclusion>,
    /// Output, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckRunOutput>,
    /// Caller-chosen id used to find the run again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// A CI run artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Provider artifact id.
    pub id: u64,
    /// Artifact name.
    pub name: String,
    /// Archive size.
    #[serde(default)]
    pub size_in_bytes: u64,
    /// Whether the artifact has expired.
    #[serde(default)]
    pub expired: bool,
}

/// How a pull request is merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Merge commit.
    Merge,
    /// Squash and merge.
    #[default]
    Squash,
    /// Rebase and merge.
    Rebase,
}

impl MergeMethod {
    /// Returns the API representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

/// Merge request guarded by the expected head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Merge method.
    pub method: MergeMethod,
    /// The merge fails if the head moved past this commit.
    pub expected_head_sha: String,
    /// Commit title.
    pub commit_title: String,
    /// Commit message; carries the idempotency marker.
    pub commit_message: String,
}

/// Result of a successful merge call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Merge commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    /// Provider message.
    #[serde(default)]
    pub message: String,
}

/// Mergeability states under which platform protections are satisfied.
pub const SATISFIED_MERGEABLE_STATES: &[&str] = &["clean", "has_hooks", "unstable"];

/// Branch-protection and review state as the provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionSnapshot {
    /// Provider's mergeability verdict; `None` while it is being computed.
    #[serde(default)]
    pub mergeable: Option<bool>,
    /// Provider's mergeability detail (`clean`, `blocked`, `behind`, ...).
    #[serde(default)]
    pub mergeable_state: String,
    /// Head commit the snapshot describes.
    #[serde(default)]
    pub head_sha: String,
}

impl ProtectionSnapshot {
    /// Whether protections and reviews independently allow a merge.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.mergeable == Some(true)
            && SATISFIED_MERGEABLE_STATES.contains(&self.mergeable_state.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_snapshot_satisfaction() {
        let mut snapshot = ProtectionSnapshot {
            mergeable: Some(true),
            mergeable_state: "clean".to_string(),
            head_sha: "abc".to_string(),
        };
        assert!(snapshot.is_satisfied());

        snapshot.mergeable_state = "blocked".to_string();
        assert!(!snapshot.is_satisfied());

        snapshot.mergeable_state = "clean".to_string();
        snapshot.mergeable = None;
        assert!(!snapshot.is_satisfied());
        assert!(!ProtectionSnapshot::default().is_satisfied());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(CheckRunStatus::InProgress.as_str(), "in_progress");
        assert_eq!(CheckConclusion::Neutral.as_str(), "neutral");
        assert_eq!(MergeMethod::default(), MergeMethod::Squash);
    }
}
