//! Persistence capability for checklists, pull request state, CI results,
//! reports and merge decisions.
//!
//! # Contracts
//!
//! Implementations must ensure:
//!
//! 1. [`Store::claim_delivery`] is atomic: of any number of concurrent
//!    claims for one delivery id, exactly one returns `true`.
//! 2. Checklist versions and report versions only grow; prior versions are
//!    retained and never rewritten.
//! 3. Storing a pull request record for a new head commit supersedes, and
//!    does not delete, manifests of earlier heads. A changed manifest for
//!    the same head supersedes the previous one for that head; an identical
//!    manifest is stored once.
//! 4. Status updates are guarded by head commit so a superseded computation
//!    cannot overwrite the state of a newer head.

mod memory;

use thiserror::Error;

pub use memory::{DEFAULT_DELIVERY_LEDGER_CAPACITY, InMemoryStore};

use crate::error::ErrorClass;
use crate::gate::MergeDecision;
use crate::model::{
    Checklist, CiRunResults, ComplianceReport, ManifestRecord, PrId, PullRequestRecord,
    ValidationStatus,
};

/// Errors emitted by store implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A versioned write did not follow the latest stored version.
    #[error("version conflict for {key}: expected v{expected}, got v{actual}")]
    VersionConflict {
        /// Document key.
        key: String,
        /// Version the store expected next.
        expected: u32,
        /// Version the caller supplied.
        actual: u32,
    },

    /// The referenced pull request has no record.
    #[error("unknown pull request: {0}")]
    UnknownPullRequest(PrId),

    /// Storage backend failure.
    #[error("storage error: {message}")]
    Backend {
        /// Description of the error.
        message: String,
    },
}

impl StoreError {
    /// Maps the error into the pipeline taxonomy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::VersionConflict { .. } => ErrorClass::ConcurrencyConflict,
            Self::UnknownPullRequest(_) => ErrorClass::MalformedInput,
            Self::Backend { .. } => ErrorClass::TransientExternal,
        }
    }
}

/// Durable upsert/lookup keyed by `(repo, issue_number)` and
/// `(repo, pr_number, head_commit)`.
pub trait Store: Send + Sync {
    /// Claims a delivery id. Returns `false` when it was already claimed.
    fn claim_delivery(&self, delivery_id: &str) -> Result<bool, StoreError>;

    /// Stores a checklist version.
    ///
    /// # Errors
    ///
    /// - [`StoreError::VersionConflict`] if `checklist.version` is not one
    ///   past the latest stored version
    fn save_checklist(&self, checklist: &Checklist) -> Result<(), StoreError>;

    /// Returns the latest checklist version for an issue.
    fn latest_checklist(
        &self,
        repo: &str,
        issue_number: u64,
    ) -> Result<Option<Checklist>, StoreError>;

    /// Returns every stored version for an issue, oldest first.
    fn checklist_versions(
        &self,
        repo: &str,
        issue_number: u64,
    ) -> Result<Vec<Checklist>, StoreError>;

    /// Stores the active state of a pull request and its manifest.
    ///
    /// Active manifests that differ from the new one are marked superseded by
    /// its head commit; re-storing an identical manifest appends nothing.
    fn upsert_pull_request(
        &self,
        record: &PullRequestRecord,
        recorded_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError>;

    /// Returns the active state of a pull request.
    fn pull_request(&self, pr_id: &PrId) -> Result<Option<PullRequestRecord>, StoreError>;

    /// Finds the pull request whose current head is `head_commit`.
    fn find_pr_by_head(
        &self,
        repo: &str,
        head_commit: &str,
    ) -> Result<Option<PullRequestRecord>, StoreError>;

    /// Returns the latest manifest stored for a head commit, active or not.
    fn manifest_for(
        &self,
        pr_id: &PrId,
        head_commit: &str,
    ) -> Result<Option<ManifestRecord>, StoreError>;

    /// Returns every manifest stored for a pull request, oldest first.
    fn manifests(&self, pr_id: &PrId) -> Result<Vec<ManifestRecord>, StoreError>;

    /// Sets the validation status if the head is still `head_commit`.
    /// Returns `false` when the head moved on.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownPullRequest`] if there is no record
    fn set_validation_status(
        &self,
        pr_id: &PrId,
        head_commit: &str,
        status: ValidationStatus,
    ) -> Result<bool, StoreError>;

    /// Stores the results of a CI run.
    fn record_ci_results(&self, results: &CiRunResults) -> Result<(), StoreError>;

    /// Returns CI results recorded for a head commit, oldest first.
    fn ci_results(
        &self,
        pr_id: &PrId,
        head_commit: &str,
    ) -> Result<Vec<CiRunResults>, StoreError>;

    /// Appends a report, assigning the next version. Returns the stored
    /// report.
    fn append_report(&self, report: ComplianceReport) -> Result<ComplianceReport, StoreError>;

    /// Returns the latest report for a pull request.
    fn latest_report(&self, pr_id: &PrId) -> Result<Option<ComplianceReport>, StoreError>;

    /// Returns every report for a pull request, oldest first.
    fn reports(&self, pr_id: &PrId) -> Result<Vec<ComplianceReport>, StoreError>;

    /// Records a merge decision.
    fn record_merge_decision(&self, decision: &MergeDecision) -> Result<(), StoreError>;

    /// Returns every merge decision for a pull request, oldest first.
    fn merge_decisions(&self, pr_id: &PrId) -> Result<Vec<MergeDecision>, StoreError>;

    /// Marks an external effect as applied. Returns `false` when it already
    /// was.
    fn mark_effect(&self, marker: &str) -> Result<bool, StoreError>;

    /// Whether an external effect was marked applied.
    fn effect_applied(&self, marker: &str) -> Result<bool, StoreError>;
}
