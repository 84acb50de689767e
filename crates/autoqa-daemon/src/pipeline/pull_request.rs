//! Pull request events: link the issue, generate and store the manifest.

use autoqa_core::checklist::revise;
use autoqa_core::events::PullRequestEvent;
use autoqa_core::forge::{CheckRunOutput, CheckRunRequest, CheckRunStatus};
use autoqa_core::manifest::{LinkHints, ManifestInput, find_linked_issue};
use autoqa_core::model::{Checklist, PullRequestRecord, RepoRef, ValidationStatus};
use autoqa_core::retry::retry;
use autoqa_core::store::StoreError;

use super::{Pipeline, PipelineError};
use crate::queue::CancellationToken;

/// Result of a pull request job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestOutcome {
    /// A manifest was stored for the head commit.
    Manifest {
        /// Head commit.
        head_sha: String,
        /// Number of expected tests.
        tests: usize,
        /// Issue the pull request resolves, if one was found.
        linked_issue: Option<u64>,
    },
    /// The pull request is already merged; nothing was done.
    AlreadyMerged,
}

/// Marker of the in-progress check run for a head commit.
#[must_use]
pub fn pending_check_marker(repo: &str, number: u64, head: &str) -> String {
    format!("autoqa-check:{repo}#{number}@{head}:pending")
}

impl Pipeline {
    pub(super) async fn handle_pull_request(
        &self,
        event: &PullRequestEvent,
        token: &CancellationToken,
    ) -> Result<PullRequestOutcome, PipelineError> {
        let repo = &event.repo;
        let number = event.number;

        let snapshot = retry(&self.retry, "fetch_pull_request", |_| {
            self.forge.fetch_pull_request(repo, number)
        })
        .await
        .map_err(|error| PipelineError::forge("fetch_pull_request", error))?;
        if snapshot.merged {
            tracing::info!(repo = %repo, pr = number, "pull request already merged");
            return Ok(PullRequestOutcome::AlreadyMerged);
        }
        if snapshot.head_sha != event.head_sha {
            return Err(PipelineError::ConcurrencyConflict(format!(
                "{repo}#{number} head is {} but the event is for {}",
                snapshot.head_sha, event.head_sha
            )));
        }

        let diff = retry(&self.retry, "fetch_pr_diff", |_| {
            self.forge.fetch_pr_diff(repo, number)
        })
        .await
        .map_err(|error| PipelineError::forge("fetch_pr_diff", error))?;
        let files = retry(&self.retry, "list_pr_files", |_| {
            self.forge.list_pr_files(repo, number)
        })
        .await
        .map_err(|error| PipelineError::forge("list_pr_files", error))?;
        let commits = retry(&self.retry, "list_pr_commit_messages", |_| {
            self.forge.list_pr_commit_messages(repo, number)
        })
        .await
        .map_err(|error| PipelineError::forge("list_pr_commit_messages", error))?;

        let linked_issue = find_linked_issue(&LinkHints {
            body: &snapshot.body,
            branch: &snapshot.head_ref,
            commits: &commits,
            labels: &snapshot.labels,
        });
        let checklist = match linked_issue {
            Some(issue) => self.ensure_checklist(repo, issue).await?,
            None => {
                tracing::info!(repo = %repo, pr = number, "no linked issue found");
                None
            },
        };

        let manifest = self.generator.generate(&ManifestInput {
            pr_number: number,
            head_sha: &event.head_sha,
            diff: &diff,
            files: &files,
            checklist: checklist.as_ref(),
        });

        if token.is_cancelled() {
            return Err(PipelineError::ConcurrencyConflict(format!(
                "{repo}#{number} moved past {} during manifest generation",
                event.head_sha
            )));
        }

        let pr_id = event.pr_id();
        let validation_status = match self.store.pull_request(&pr_id)? {
            Some(existing) if existing.head_commit == event.head_sha => existing.validation_status,
            _ => ValidationStatus::Pending,
        };
        let tests = manifest.tests.len();
        let record = PullRequestRecord {
            repo: repo.full_name.clone(),
            pr_number: number,
            linked_issue_id: linked_issue,
            head_commit: event.head_sha.clone(),
            manifest,
            validation_status,
        };
        self.store.upsert_pull_request(&record, self.clock.now())?;
        tracing::info!(
            repo = %repo,
            pr = number,
            head_sha = %event.head_sha,
            tests,
            linked_issue = ?linked_issue,
            "manifest stored"
        );

        self.open_check_run(repo, number, &event.head_sha).await;

        Ok(PullRequestOutcome::Manifest {
            head_sha: event.head_sha.clone(),
            tests,
            linked_issue,
        })
    }

    /// Returns the stored checklist of `issue`, extracting and storing it
    /// first when the issue was never processed.
    ///
    /// An unreachable or missing issue yields `None`; the manifest is then
    /// built from the diff alone.
    async fn ensure_checklist(
        &self,
        repo: &RepoRef,
        issue: u64,
    ) -> Result<Option<Checklist>, PipelineError> {
        if let Some(checklist) = self.store.latest_checklist(&repo.full_name, issue)? {
            return Ok(Some(checklist));
        }

        let snapshot = match retry(&self.retry, "fetch_issue", |_| {
            self.forge.fetch_issue(repo, issue)
        })
        .await
        {
            Ok(snapshot) => snapshot,
            Err(error) if error.is_transient() => {
                return Err(PipelineError::forge("fetch_issue", error));
            },
            Err(error) => {
                tracing::warn!(repo = %repo, issue, error = %error, "linked issue unavailable");
                return Ok(None);
            },
        };

        let text = format!("{}\n\n{}", snapshot.title, snapshot.body);
        let items = self.extractor.extract(&text).await;
        let checklist = revise(None, &repo.full_name, issue, items, self.clock.now()).into_checklist();
        match self.store.save_checklist(&checklist) {
            Ok(()) => Ok(Some(checklist)),
            // A concurrent issue job stored it first.
            Err(StoreError::VersionConflict { .. }) => {
                Ok(self.store.latest_checklist(&repo.full_name, issue)?)
            },
            Err(error) => Err(error.into()),
        }
    }

    async fn open_check_run(&self, repo: &RepoRef, number: u64, head: &str) {
        let marker = pending_check_marker(&repo.full_name, number, head);
        match self.store.effect_applied(&marker) {
            Ok(false) => {},
            Ok(true) => return,
            Err(error) => {
                tracing::warn!(repo = %repo, pr = number, error = %error, "effect lookup failed");
                return;
            },
        }

        let request = CheckRunRequest {
            name: self.check_name.clone(),
            head_sha: head.to_string(),
            status: CheckRunStatus::InProgress,
            conclusion: None,
            output: Some(CheckRunOutput {
                title: "Waiting for test results".to_string(),
                summary: "AutoQA generated the test manifest for this commit and is \
                          waiting for CI results."
                    .to_string(),
            }),
            external_id: Some(marker.clone()),
        };
        match self.forge.create_check_run(repo, &request).await {
            Ok(check_run_id) => {
                if let Err(error) = self.store.mark_effect(&marker) {
                    tracing::warn!(repo = %repo, pr = number, error = %error, "effect not recorded");
                }
                tracing::debug!(repo = %repo, pr = number, check_run_id, "check run opened");
            },
            Err(error) => {
                tracing::warn!(
                    repo = %repo,
                    pr = number,
                    head_sha = head,
                    error = %error,
                    "could not open check run"
                );
            },
        }
    }
}
