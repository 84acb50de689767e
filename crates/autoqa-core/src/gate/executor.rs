//! Executes eligible merge decisions against the forge.
//!
//! The merge call carries the decision's head commit as the provider's
//! head-SHA guard and an idempotency marker in the commit message. The
//! marker is also recorded in the store once the merge took effect, so a
//! redelivered event or a restarted daemon never merges twice. Before a
//! failed merge is retried, the forge is asked whether the pull request is
//! already merged.

use std::sync::Arc;

use thiserror::Error;

use super::{MergeDecision, MergeExecution};
use crate::forge::{ForgeProvider, MergeMethod, MergeRequest};
use crate::model::{RepoRef, ValidationStatus};
use crate::retry::{EffectOutcome, RetryPolicy, retry_effect};
use crate::store::{Store, StoreError};

/// Errors from recording or executing a decision.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MergeExecutorError {
    /// The decision belongs to another repository.
    #[error("decision for {decision_repo} cannot be executed against {repo}")]
    RepositoryMismatch {
        /// Repository of the decision.
        decision_repo: String,
        /// Repository passed to the executor.
        repo: String,
    },

    /// Recording the decision failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Records merge decisions and performs the eligible ones.
pub struct MergeExecutor {
    forge: Arc<dyn ForgeProvider>,
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    method: MergeMethod,
}

impl std::fmt::Debug for MergeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeExecutor")
            .field("forge", &self.forge.provider_name())
            .field("retry", &self.retry)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl MergeExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        forge: Arc<dyn ForgeProvider>,
        store: Arc<dyn Store>,
        retry: RetryPolicy,
        method: MergeMethod,
    ) -> Self {
        Self {
            forge,
            store,
            retry,
            method,
        }
    }

    /// Executes the decision if it is eligible, then records it.
    ///
    /// Declined decisions are recorded unchanged. A failed merge is not an
    /// error for the caller: it is recorded as [`MergeExecution::Failed`].
    pub async fn finalize(
        &self,
        repo: &RepoRef,
        mut decision: MergeDecision,
    ) -> Result<MergeDecision, MergeExecutorError> {
        if decision.pr_id.repo != repo.full_name {
            return Err(MergeExecutorError::RepositoryMismatch {
                decision_repo: decision.pr_id.repo.clone(),
                repo: repo.full_name.clone(),
            });
        }

        if decision.eligible {
            let execution = self.execute(repo, &decision).await?;
            if matches!(
                execution,
                MergeExecution::Merged { .. } | MergeExecution::AlreadyApplied
            ) {
                self.store.set_validation_status(
                    &decision.pr_id,
                    &decision.head_commit,
                    ValidationStatus::Merged,
                )?;
            }
            decision.execution = Some(execution);
        } else {
            tracing::info!(
                pr = %decision.pr_id,
                head_sha = %decision.head_commit,
                reasons = ?decision.reasons,
                "merge gate declined"
            );
        }

        self.store.record_merge_decision(&decision)?;
        Ok(decision)
    }

    async fn execute(
        &self,
        repo: &RepoRef,
        decision: &MergeDecision,
    ) -> Result<MergeExecution, MergeExecutorError> {
        let marker = decision.marker();
        let number = decision.pr_id.number;
        if self.store.effect_applied(&marker)? {
            tracing::info!(pr = %decision.pr_id, %marker, "merge already applied");
            return Ok(MergeExecution::AlreadyApplied);
        }

        let request = MergeRequest {
            method: self.method,
            expected_head_sha: decision.head_commit.clone(),
            commit_title: format!("Merge #{number}: AutoQA checklist satisfied"),
            commit_message: format!(
                "All required checklist items passed (report v{}).\n\n{marker}",
                decision.report_version
            ),
        };

        let outcome = retry_effect(
            &self.retry,
            "merge_pull_request",
            |_| self.forge.merge_pull_request(repo, number, &request),
            || self.forge.is_merged(repo, number),
        )
        .await;

        let execution = match outcome {
            Ok(EffectOutcome::Performed(result)) => {
                self.store.mark_effect(&marker)?;
                tracing::info!(
                    pr = %decision.pr_id,
                    head_sha = %decision.head_commit,
                    merge_sha = ?result.sha,
                    "pull request merged"
                );
                MergeExecution::Merged { sha: result.sha }
            },
            Ok(EffectOutcome::AlreadyApplied) => {
                self.store.mark_effect(&marker)?;
                MergeExecution::AlreadyApplied
            },
            Err(err) => {
                tracing::warn!(
                    pr = %decision.pr_id,
                    head_sha = %decision.head_commit,
                    error = %err,
                    class = %err.class(),
                    "merge failed"
                );
                MergeExecution::Failed {
                    error: err.to_string(),
                    class: err.class(),
                }
            },
        };
        Ok(execution)
    }
}
