//! Per-event pipeline handlers.
//!
//! # Architecture
//!
//! ```text
//! Job::Issue       -> fetch issue -> ChecklistExtractor -> revise -> store -> comment
//! Job::PullRequest -> fetch PR/diff/files/commits -> link issue -> ManifestGenerator
//!                     -> store (supersedes older heads) -> check run (in progress)
//! Job::CiRun       -> artifacts -> ingest -> Reconciler -> store report vN
//!                     -> comment + check run -> gate -> MergeExecutor
//! ```
//!
//! # Failure dispositions
//!
//! | Class               | Disposition                                        |
//! |---------------------|----------------------------------------------------|
//! | transient external  | record marked `results_pending`, warn              |
//! | malformed input     | warn, nothing else                                 |
//! | configuration       | error, explanatory comment posted once             |
//! | concurrency conflict| info, dropped                                      |
//!
//! Every provider write is guarded by a marker (comments, check runs, the
//! merge) so a redelivered or retried job never applies it twice.

mod ci_run;
mod effects;
mod error;
mod issue;
mod pull_request;

use std::sync::Arc;

use autoqa_core::checklist::ChecklistExtractor;
use autoqa_core::clock::Clock;
use autoqa_core::config::{AutoQaConfig, ConfigError};
use autoqa_core::error::ErrorClass;
use autoqa_core::events::{CiRunEvent, IssueEvent, PullRequestEvent};
use autoqa_core::forge::ForgeProvider;
use autoqa_core::gate::{MergeExecutor, MergePolicy};
use autoqa_core::log::redact_body;
use autoqa_core::manifest::ManifestGenerator;
use autoqa_core::model::{PrId, RepoRef, ValidationStatus};
use autoqa_core::reconcile::Reconciler;
use autoqa_core::retry::RetryPolicy;
use autoqa_core::store::{Store, StoreError};

pub use ci_run::CiRunOutcome;
pub use effects::post_once;
pub use error::PipelineError;
pub use issue::IssueOutcome;
pub use pull_request::PullRequestOutcome;

use crate::queue::CancellationToken;

/// Default check-run name.
pub const DEFAULT_CHECK_NAME: &str = "AutoQA";

/// Prefix of the marker on configuration-error comments.
pub const CONFIG_ERROR_MARKER_PREFIX: &str = "<!-- autoqa:configuration-error";

/// One unit of pipeline work.
#[derive(Debug, Clone)]
pub enum Job {
    /// Regenerate the checklist of an issue.
    Issue(IssueEvent),
    /// Regenerate the manifest of a pull request head.
    PullRequest(PullRequestEvent),
    /// Ingest and reconcile one CI run for one pull request.
    CiRun {
        /// The run.
        event: CiRunEvent,
        /// Pull request the run is reconciled against.
        pr_number: u64,
    },
}

impl Job {
    /// Repository of the job.
    #[must_use]
    pub const fn repo(&self) -> &RepoRef {
        match self {
            Self::Issue(event) => &event.repo,
            Self::PullRequest(event) => &event.repo,
            Self::CiRun { event, .. } => &event.repo,
        }
    }

    /// Issue or pull request number the job works on.
    #[must_use]
    pub const fn number(&self) -> u64 {
        match self {
            Self::Issue(event) => event.number,
            Self::PullRequest(event) => event.number,
            Self::CiRun { pr_number, .. } => *pr_number,
        }
    }

    /// Head commit the job is tied to, for pull request work.
    #[must_use]
    pub fn head_sha(&self) -> Option<&str> {
        match self {
            Self::Issue(_) => None,
            Self::PullRequest(event) => Some(&event.head_sha),
            Self::CiRun { event, .. } => Some(&event.head_sha),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Issue(_) => "issue",
            Self::PullRequest(_) => "pull_request",
            Self::CiRun { .. } => "ci_run",
        }
    }
}

/// What a successful job did.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Issue job result.
    Issue(IssueOutcome),
    /// Pull request job result.
    PullRequest(PullRequestOutcome),
    /// CI run job result.
    CiRun(CiRunOutcome),
}

/// The event-driven half of AutoQA.
pub struct Pipeline {
    forge: Arc<dyn ForgeProvider>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    extractor: ChecklistExtractor,
    generator: ManifestGenerator,
    reconciler: Reconciler,
    merge_policy: MergePolicy,
    retry: RetryPolicy,
    check_name: String,
    executor: MergeExecutor,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("forge", &self.forge.provider_name())
            .field("extractor", &self.extractor)
            .field("merge_policy", &self.merge_policy)
            .field("check_name", &self.check_name)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline with default stages and policies: no enrichment,
    /// auto-merge disabled, default retries.
    #[must_use]
    pub fn new(
        forge: Arc<dyn ForgeProvider>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retry = RetryPolicy::default();
        let merge_policy = MergePolicy::default();
        let executor = MergeExecutor::new(
            Arc::clone(&forge),
            Arc::clone(&store),
            retry.clone(),
            merge_policy.method,
        );
        Self {
            forge,
            store,
            clock,
            extractor: ChecklistExtractor::default(),
            generator: ManifestGenerator::default(),
            reconciler: Reconciler::default(),
            merge_policy,
            retry,
            check_name: DEFAULT_CHECK_NAME.to_string(),
            executor,
        }
    }

    /// Creates a pipeline configured by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the matching or manifest sections are invalid.
    pub fn from_config(
        config: &AutoQaConfig,
        forge: Arc<dyn ForgeProvider>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        extractor: ChecklistExtractor,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(forge, store, clock)
            .with_extractor(extractor)
            .with_generator(config.manifest_generator()?)
            .with_reconciler(config.reconciler()?)
            .with_retry(config.retry.clone())
            .with_merge_policy(config.merge.clone())
            .with_check_name(config.github.check_name.clone()))
    }

    /// Replaces the checklist extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: ChecklistExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replaces the manifest generator.
    #[must_use]
    pub fn with_generator(mut self, generator: ManifestGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Replaces the reconciler.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.rebuild_executor();
        self
    }

    /// Replaces the merge policy.
    #[must_use]
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self.rebuild_executor();
        self
    }

    /// Replaces the check-run name.
    #[must_use]
    pub fn with_check_name(mut self, check_name: impl Into<String>) -> Self {
        self.check_name = check_name.into();
        self
    }

    fn rebuild_executor(&mut self) {
        self.executor = MergeExecutor::new(
            Arc::clone(&self.forge),
            Arc::clone(&self.store),
            self.retry.clone(),
            self.merge_policy.method,
        );
    }

    /// Runs `job`, then applies the failure disposition if it failed.
    ///
    /// The error is returned after the disposition so callers can log or
    /// assert on it.
    pub async fn run(
        &self,
        job: &Job,
        token: &CancellationToken,
    ) -> Result<JobOutcome, PipelineError> {
        let result = match job {
            Job::Issue(event) => self.handle_issue(event).await.map(JobOutcome::Issue),
            Job::PullRequest(event) => self
                .handle_pull_request(event, token)
                .await
                .map(JobOutcome::PullRequest),
            Job::CiRun { event, pr_number } => self
                .handle_ci_run(event, *pr_number, token)
                .await
                .map(JobOutcome::CiRun),
        };

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    kind = job.kind(),
                    repo = %job.repo(),
                    number = job.number(),
                    outcome = ?outcome,
                    "job finished"
                );
                Ok(outcome)
            },
            Err(error) => {
                self.dispose(job, &error).await;
                Err(error)
            },
        }
    }

    async fn dispose(&self, job: &Job, error: &PipelineError) {
        let repo = job.repo();
        let number = job.number();
        match error.class() {
            ErrorClass::TransientExternal => {
                tracing::warn!(
                    kind = job.kind(),
                    repo = %repo,
                    number,
                    error = %error,
                    "provider unavailable, results pending"
                );
                if let (Job::PullRequest(_) | Job::CiRun { .. }, Some(head)) = (job, job.head_sha())
                {
                    self.mark_results_pending(&PrId::new(repo.full_name.clone(), number), head);
                }
            },
            ErrorClass::MalformedInput | ErrorClass::PolicyViolation => {
                tracing::warn!(
                    kind = job.kind(),
                    repo = %repo,
                    number,
                    error = %error,
                    "input could not be processed"
                );
            },
            ErrorClass::Configuration => {
                tracing::error!(
                    kind = job.kind(),
                    repo = %repo,
                    number,
                    error = %error,
                    "configuration error"
                );
                self.explain_configuration_error(job, error).await;
            },
            ErrorClass::ConcurrencyConflict => {
                tracing::info!(
                    kind = job.kind(),
                    repo = %repo,
                    number,
                    error = %error,
                    "superseded computation dropped"
                );
            },
        }
    }

    fn mark_results_pending(&self, pr_id: &PrId, head: &str) {
        match self
            .store
            .set_validation_status(pr_id, head, ValidationStatus::ResultsPending)
        {
            Ok(true) => {},
            Ok(false) => {
                tracing::debug!(pr = %pr_id, head_sha = head, "head moved, status left alone");
            },
            Err(StoreError::UnknownPullRequest(_)) => {},
            Err(error) => {
                tracing::warn!(pr = %pr_id, error = %error, "failed to mark results pending");
            },
        }
    }

    async fn explain_configuration_error(&self, job: &Job, error: &PipelineError) {
        let repo = job.repo();
        let number = job.number();
        let marker = configuration_marker(&repo.full_name, number);
        let body = format!(
            "{marker}\n**AutoQA could not process this {}.**\n\n\
             `{}`\n\n\
             Check the AutoQA GitHub App installation and configuration, then \
             edit or push to retry.\n",
            if matches!(job, Job::Issue(_)) {
                "issue"
            } else {
                "pull request"
            },
            redact_body(&error.to_string()).replace('`', "'"),
        );
        if let Err(post_error) =
            post_once(self.forge.as_ref(), &RetryPolicy::none(), repo, number, &marker, &body).await
        {
            tracing::warn!(
                repo = %repo,
                number,
                error = %post_error,
                "could not post configuration error comment"
            );
        }
    }
}

/// Marker of the configuration-error comment on `repo#number`.
#[must_use]
pub fn configuration_marker(repo: &str, number: u64) -> String {
    format!("{CONFIG_ERROR_MARKER_PREFIX} {repo}#{number} -->")
}

#[cfg(test)]
mod tests;
