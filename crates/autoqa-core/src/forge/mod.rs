//! Provider-agnostic access to issues, pull requests and CI runs.
//!
//! The pipeline never talks to a provider API directly; it goes through
//! [`ForgeProvider`]. The daemon ships a GitHub REST implementation and this
//! crate ships [`InMemoryForge`] for tests and offline runs.

mod memory;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryForge;
pub use types::{
    Artifact, CheckConclusion, CheckRunOutput, CheckRunRequest, CheckRunStatus, Comment,
    IssueSnapshot, MergeMethod, MergeRequest, MergeResult, ProtectionSnapshot,
    PullRequestSnapshot, SATISFIED_MERGEABLE_STATES,
};

use crate::error::ErrorClass;
use crate::model::{ChangedFile, RepoRef};

/// Errors emitted by forge providers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ForgeError {
    /// Invalid provider configuration.
    #[error("forge configuration error: {0}")]
    Configuration(String),

    /// Provider authentication failed.
    #[error("forge authentication error: {0}")]
    Authentication(String),

    /// Request transport failed.
    #[error("forge transport error: {0}")]
    Transport(String),

    /// The provider throttled the request.
    #[error("forge rate limit exceeded")]
    RateLimited {
        /// Provider-requested wait, when given.
        retry_after: Option<Duration>,
    },

    /// The requested resource does not exist or is not visible.
    #[error("forge resource not found: {resource}")]
    NotFound {
        /// Resource path or description.
        resource: String,
    },

    /// The request conflicts with current state (e.g. the head moved).
    #[error("forge conflict: {0}")]
    Conflict(String),

    /// API request failed with a structured status code.
    #[error("forge API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the forge API.
        status: u16,
        /// Error body/message.
        message: String,
    },

    /// API payload parse failed.
    #[error("forge parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ForgeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl ForgeError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider-requested wait before retrying.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the credentials were rejected.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Maps the error into the pipeline taxonomy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        if self.is_transient() {
            return ErrorClass::TransientExternal;
        }
        match self {
            Self::Configuration(_) | Self::Authentication(_) => ErrorClass::Configuration,
            Self::Conflict(_) => ErrorClass::ConcurrencyConflict,
            _ => ErrorClass::MalformedInput,
        }
    }
}

/// Provider-agnostic forge interface.
///
/// Every call may fail with rate-limit, authentication or not-found
/// conditions; see [`ForgeError::class`].
#[async_trait]
pub trait ForgeProvider: Send + Sync {
    /// Returns the provider name.
    fn provider_name(&self) -> &'static str;

    /// Fetches an issue's body and labels.
    async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> Result<IssueSnapshot, ForgeError>;

    /// Fetches a pull request, including its current head commit.
    async fn fetch_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestSnapshot, ForgeError>;

    /// Fetches the unified diff of a pull request.
    async fn fetch_pr_diff(&self, repo: &RepoRef, number: u64) -> Result<String, ForgeError>;

    /// Lists the files a pull request changes.
    async fn list_pr_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ChangedFile>, ForgeError>;

    /// Lists commit messages of a pull request, oldest first.
    async fn list_pr_commit_messages(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<String>, ForgeError>;

    /// Lists comments on an issue or pull request.
    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<Comment>, ForgeError>;

    /// Posts a comment on an issue or pull request.
    async fn post_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<Comment, ForgeError>;

    /// Creates a check run and returns its id.
    async fn create_check_run(
        &self,
        repo: &RepoRef,
        request: &CheckRunRequest,
    ) -> Result<u64, ForgeError>;

    /// Updates an existing check run.
    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &CheckRunRequest,
    ) -> Result<(), ForgeError>;

    /// Lists the artifacts of a CI run.
    async fn list_run_artifacts(
        &self,
        repo: &RepoRef,
        run_id: u64,
    ) -> Result<Vec<Artifact>, ForgeError>;

    /// Downloads an artifact archive.
    async fn download_artifact(
        &self,
        repo: &RepoRef,
        artifact_id: u64,
    ) -> Result<Vec<u8>, ForgeError>;

    /// Merges a pull request if its head is still `expected_head_sha`.
    async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeResult, ForgeError>;

    /// Whether a pull request is merged.
    async fn is_merged(&self, repo: &RepoRef, number: u64) -> Result<bool, ForgeError>;

    /// Fetches branch-protection and review state for a pull request.
    async fn fetch_protection(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<ProtectionSnapshot, ForgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let rate_limited = ForgeError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(rate_limited.is_transient());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(rate_limited.class(), ErrorClass::TransientExternal);

        let server = ForgeError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(server.class(), ErrorClass::TransientExternal);

        let client = ForgeError::Api {
            status: 422,
            message: "unprocessable".to_string(),
        };
        assert!(!client.is_transient());
        assert_eq!(client.class(), ErrorClass::MalformedInput);

        assert_eq!(
            ForgeError::Authentication("bad credentials".to_string()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            ForgeError::Conflict("head moved".to_string()).class(),
            ErrorClass::ConcurrencyConflict
        );
        assert_eq!(
            ForgeError::NotFound {
                resource: "issues/4".to_string()
            }
            .class(),
            ErrorClass::MalformedInput
        );
    }
}
