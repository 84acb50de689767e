//! CI run events: ingest reports, reconcile, publish, gate.

use autoqa_core::events::CiRunEvent;
use autoqa_core::forge::{CheckRunRequest, CheckRunStatus, ProtectionSnapshot};
use autoqa_core::gate::{GateInput, MergeDecision, MergeExecution, evaluate};
use autoqa_core::ingest::{bind_results, ingest_reports};
use autoqa_core::model::{
    ComplianceReport, PrId, PullRequestRecord, RepoRef, TestOutcome, ValidationStatus,
};
use autoqa_core::reconcile::{check_summary, render_report_comment, report_marker};
use autoqa_core::retry::retry;

use super::{Pipeline, PipelineError, post_once};
use crate::artifacts::{archive_error_outcome, extract_reports, is_report_artifact};
use crate::queue::CancellationToken;

/// Result of a CI run job.
#[derive(Debug, Clone, PartialEq)]
pub struct CiRunOutcome {
    /// Version of the stored report.
    pub report_version: u32,
    /// Compliance score.
    pub score: f64,
    /// Status recorded for the pull request.
    pub status: ValidationStatus,
    /// Whether the gate found the pull request eligible.
    pub eligible: bool,
    /// Merge execution, for eligible decisions.
    pub execution: Option<MergeExecution>,
}

/// Marker of the completed check run for one report version.
#[must_use]
pub fn report_check_marker(report: &ComplianceReport) -> String {
    format!(
        "autoqa-check:{}@{}:v{}",
        report.pr_id, report.head_commit, report.version
    )
}

impl Pipeline {
    pub(super) async fn handle_ci_run(
        &self,
        event: &CiRunEvent,
        pr_number: u64,
        token: &CancellationToken,
    ) -> Result<CiRunOutcome, PipelineError> {
        let repo = &event.repo;
        let pr_id = PrId::new(repo.full_name.clone(), pr_number);

        let record = self.store.pull_request(&pr_id)?.ok_or_else(|| {
            PipelineError::ConcurrencyConflict(format!(
                "{pr_id} has no manifest yet for run {}",
                event.run_id
            ))
        })?;
        if record.head_commit != event.head_sha {
            return Err(PipelineError::ConcurrencyConflict(format!(
                "run {} tested {} but {pr_id} is now at {}",
                event.run_id, event.head_sha, record.head_commit
            )));
        }

        let outcomes = self.collect_outcomes(repo, event).await?;
        let results = bind_results(
            &repo.full_name,
            pr_number,
            &event.head_sha,
            Some(event.run_id),
            outcomes,
            self.clock.now(),
        );

        let checklist = match record.linked_issue_id {
            Some(issue) => self.store.latest_checklist(&repo.full_name, issue)?,
            None => None,
        };
        let report = self
            .reconciler
            .reconcile(&record.manifest, &results, checklist.as_ref())?;

        if token.is_cancelled() {
            return Err(PipelineError::ConcurrencyConflict(format!(
                "{pr_id} moved past {} during reconciliation",
                event.head_sha
            )));
        }

        self.store.record_ci_results(&results)?;
        let report = self.store.append_report(report)?;
        let status = if report.is_fully_compliant() && !report.has_failed_required() {
            ValidationStatus::Compliant
        } else {
            ValidationStatus::NonCompliant
        };
        self.store
            .set_validation_status(&pr_id, &report.head_commit, status)?;
        tracing::info!(
            pr = %pr_id,
            head_sha = %report.head_commit,
            run_id = event.run_id,
            version = report.version,
            score = report.score,
            unmapped = report.unmapped_outcomes.len(),
            "compliance report stored"
        );

        if let Err(error) = post_once(
            self.forge.as_ref(),
            &self.retry,
            repo,
            pr_number,
            &report_marker(&report),
            &render_report_comment(&report),
        )
        .await
        {
            tracing::warn!(
                pr = %pr_id,
                version = report.version,
                error = %error,
                "could not post compliance report"
            );
        }
        self.complete_check_run(repo, &report).await;

        let decision = self.gate(repo, &record, &report).await?;
        let decision = self.executor.finalize(repo, decision).await?;

        Ok(CiRunOutcome {
            report_version: report.version,
            score: report.score,
            status,
            eligible: decision.eligible,
            execution: decision.execution,
        })
    }

    /// Downloads the run's report artifacts and ingests them.
    ///
    /// Unreadable archives become synthetic error outcomes. When every
    /// report artifact was unreadable, those outcomes stand alone.
    async fn collect_outcomes(
        &self,
        repo: &RepoRef,
        event: &CiRunEvent,
    ) -> Result<Vec<TestOutcome>, PipelineError> {
        let artifacts = retry(&self.retry, "list_run_artifacts", |_| {
            self.forge.list_run_artifacts(repo, event.run_id)
        })
        .await
        .map_err(|error| PipelineError::forge("list_run_artifacts", error))?;

        let mut reports = Vec::new();
        let mut archive_errors = Vec::new();
        for artifact in artifacts.iter().filter(|artifact| is_report_artifact(artifact)) {
            let bytes = retry(&self.retry, "download_artifact", |_| {
                self.forge.download_artifact(repo, artifact.id)
            })
            .await
            .map_err(|error| PipelineError::forge("download_artifact", error))?;
            match extract_reports(&bytes) {
                Ok(members) => {
                    tracing::debug!(
                        artifact = %artifact.name,
                        reports = members.len(),
                        "artifact extracted"
                    );
                    reports.extend(
                        members
                            .into_iter()
                            .map(|(member, content)| (format!("{}/{member}", artifact.name), content)),
                    );
                },
                Err(error) => {
                    tracing::warn!(artifact = %artifact.name, error = %error, "unreadable artifact");
                    archive_errors.push(archive_error_outcome(&artifact.name, &error));
                },
            }
        }

        if reports.is_empty() && !archive_errors.is_empty() {
            return Ok(archive_errors);
        }
        let mut outcomes = ingest_reports(
            reports
                .iter()
                .map(|(name, content)| (name.as_str(), content.as_slice())),
        );
        outcomes.extend(archive_errors);
        Ok(outcomes)
    }

    async fn complete_check_run(&self, repo: &RepoRef, report: &ComplianceReport) {
        let marker = report_check_marker(report);
        match self.store.effect_applied(&marker) {
            Ok(false) => {},
            Ok(true) => return,
            Err(error) => {
                tracing::warn!(pr = %report.pr_id, error = %error, "effect lookup failed");
                return;
            },
        }

        let (conclusion, output) = check_summary(report);
        let request = CheckRunRequest {
            name: self.check_name.clone(),
            head_sha: report.head_commit.clone(),
            status: CheckRunStatus::Completed,
            conclusion: Some(conclusion),
            output: Some(output),
            external_id: Some(marker.clone()),
        };
        match self.forge.create_check_run(repo, &request).await {
            Ok(check_run_id) => {
                if let Err(error) = self.store.mark_effect(&marker) {
                    tracing::warn!(pr = %report.pr_id, error = %error, "effect not recorded");
                }
                tracing::debug!(pr = %report.pr_id, check_run_id, "check run completed");
            },
            Err(error) => {
                tracing::warn!(pr = %report.pr_id, error = %error, "could not complete check run");
            },
        }
    }

    /// Evaluates the merge gate for a freshly stored report.
    ///
    /// Provider state is only consulted when auto-merge is enabled; an
    /// unreadable protection snapshot counts as unsatisfied.
    async fn gate(
        &self,
        repo: &RepoRef,
        record: &PullRequestRecord,
        report: &ComplianceReport,
    ) -> Result<MergeDecision, PipelineError> {
        let number = record.pr_number;
        let (current_head, already_merged, protection) =
            if self.merge_policy.auto_merge_enabled(&repo.full_name) {
                let snapshot = retry(&self.retry, "fetch_pull_request", |_| {
                    self.forge.fetch_pull_request(repo, number)
                })
                .await
                .map_err(|error| PipelineError::forge("fetch_pull_request", error))?;
                let protection = match retry(&self.retry, "fetch_protection", |_| {
                    self.forge.fetch_protection(repo, number)
                })
                .await
                {
                    Ok(protection) => protection,
                    Err(error) => {
                        tracing::warn!(
                            pr = %report.pr_id,
                            error = %error,
                            "protection state unavailable"
                        );
                        ProtectionSnapshot::default()
                    },
                };
                (snapshot.head_sha, snapshot.merged, protection)
            } else {
                (
                    record.head_commit.clone(),
                    record.validation_status == ValidationStatus::Merged,
                    ProtectionSnapshot::default(),
                )
            };

        Ok(evaluate(
            &self.merge_policy,
            &GateInput {
                report,
                current_head: &current_head,
                already_merged,
                protection: &protection,
            },
            self.clock.now(),
        ))
    }
}
