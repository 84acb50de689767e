use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::time::Duration;

use autoqa_core::clock::FixedClock;
use autoqa_core::forge::{
    Artifact, CheckRunStatus, ForgeError, InMemoryForge, IssueSnapshot, ProtectionSnapshot,
    PullRequestSnapshot,
};
use autoqa_core::gate::MergeExecution;
use autoqa_core::model::{ChangedFile, FileStatus, ItemStatus};
use autoqa_core::store::InMemoryStore;
use chrono::{TimeZone, Utc};
use zip::write::SimpleFileOptions;

use super::*;
use crate::queue::CancellationSource;

// ============================================================================
// Fixtures
// ============================================================================

const REPO: &str = "octo/signup";

const ISSUE_BODY: &str = "Acceptance Criteria\n- validate email\n- send confirmation";

const DIFF: &str = "\
diff --git a/src/signup.js b/src/signup.js
--- a/src/signup.js
+++ b/src/signup.js
@@ -1,2 +1,5 @@
 import { mailer } from './mailer';
+export function confirmSignup(token) {
+  return mailer.send(token);
+}
 export default {};
";

const DIFF_BOTH: &str = "\
diff --git a/src/signup.js b/src/signup.js
--- a/src/signup.js
+++ b/src/signup.js
@@ -1,2 +1,8 @@
 import { mailer } from './mailer';
+export function confirmSignup(token) {
+  return mailer.send(token);
+}
+export function validateEmail(value) {
+  return /@/.test(value);
+}
 export default {};
";

const PASSING_CONFIRM: &str = r#"<testsuite name="signup">
  <testcase classname="signup.spec" name="test_confirmSignup_autoqa"/>
</testsuite>"#;

const PASSING_BOTH: &str = r#"<testsuite name="signup">
  <testcase classname="signup.spec" name="test_confirmSignup_autoqa"/>
  <testcase classname="signup.spec" name="test_validateEmail_autoqa"/>
</testsuite>"#;

struct Harness {
    forge: Arc<InMemoryForge>,
    store: Arc<InMemoryStore>,
    pipeline: Pipeline,
    source: CancellationSource,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

fn harness() -> Harness {
    let forge = Arc::new(InMemoryForge::new());
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::new(
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
    ));
    let pipeline = Pipeline::new(forge.clone(), store.clone(), clock).with_retry(fast_retry());
    Harness {
        forge,
        store,
        pipeline,
        source: CancellationSource::new(),
    }
}

fn repo() -> RepoRef {
    RepoRef::new(REPO)
}

fn zip_of(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in members {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn put_issue(forge: &InMemoryForge) {
    forge.put_issue(
        REPO,
        IssueSnapshot {
            number: 4,
            title: "Signup confirmation".to_string(),
            body: ISSUE_BODY.to_string(),
            labels: Vec::new(),
        },
    );
}

fn put_pull_request(forge: &InMemoryForge, head: &str, diff: &str) {
    forge.put_pull_request(
        REPO,
        PullRequestSnapshot {
            number: 12,
            title: "Confirm signups".to_string(),
            body: "Fixes #4".to_string(),
            head_sha: head.to_string(),
            head_ref: "feature/confirm".to_string(),
            base_ref: "main".to_string(),
            ..PullRequestSnapshot::default()
        },
        diff,
        vec![ChangedFile::new("src/signup.js", FileStatus::Modified)],
    );
}

fn put_report(forge: &InMemoryForge, run_id: u64, xml: &str) {
    forge.put_artifact(
        REPO,
        run_id,
        Artifact {
            id: run_id * 10,
            name: "junit-results".to_string(),
            size_in_bytes: 100,
            expired: false,
        },
        zip_of(&[("reports/signup.xml", xml)]),
    );
}

fn pr_job(head: &str) -> Job {
    Job::PullRequest(PullRequestEvent {
        repo: repo(),
        number: 12,
        action: "synchronize".to_string(),
        head_sha: head.to_string(),
    })
}

fn ci_job(run_id: u64, head: &str) -> Job {
    Job::CiRun {
        event: CiRunEvent {
            repo: repo(),
            run_id,
            workflow_name: "ci".to_string(),
            head_sha: head.to_string(),
            pull_requests: vec![12],
            conclusion: Some("success".to_string()),
        },
        pr_number: 12,
    }
}

fn issue_job() -> Job {
    Job::Issue(IssueEvent {
        repo: repo(),
        number: 4,
        action: "opened".to_string(),
    })
}

fn pr_id() -> PrId {
    PrId::new(REPO, 12)
}

// ============================================================================
// Issue jobs
// ============================================================================

#[tokio::test]
async fn test_issue_job_stores_and_publishes_checklist() {
    let h = harness();
    put_issue(&h.forge);

    let outcome = h.pipeline.run(&issue_job(), &h.source.token()).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Issue(IssueOutcome {
            version: 1,
            new_version: true,
            items: 2,
            commented: true,
        })
    );
    let comments = h.forge.comments(REPO, 4);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.contains("send confirmation"));

    // Reprocessing the same text reuses v1 and does not comment again.
    let again = h.pipeline.run(&issue_job(), &h.source.token()).await.unwrap();
    let JobOutcome::Issue(again) = again else {
        panic!("expected an issue outcome");
    };
    assert_eq!(again.version, 1);
    assert!(!again.new_version);
    assert!(!again.commented);
    assert_eq!(h.forge.comments(REPO, 4).len(), 1);
}

#[tokio::test]
async fn test_issue_edit_mints_new_version() {
    let h = harness();
    put_issue(&h.forge);
    h.pipeline.run(&issue_job(), &h.source.token()).await.unwrap();

    h.forge.put_issue(
        REPO,
        IssueSnapshot {
            number: 4,
            title: "Signup confirmation".to_string(),
            body: format!("{ISSUE_BODY}\n- log the signup"),
            labels: Vec::new(),
        },
    );
    h.pipeline.run(&issue_job(), &h.source.token()).await.unwrap();

    let versions = h.store.checklist_versions(REPO, 4).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].items.len(), 2);
    assert_eq!(versions[1].items.len(), 3);
    assert_eq!(h.forge.comments(REPO, 4).len(), 2);
}

#[tokio::test]
async fn test_authentication_failure_is_explained_once() {
    let h = harness();
    put_issue(&h.forge);
    for _ in 0..2 {
        h.forge.fail_next(
            "fetch_issue",
            ForgeError::Authentication("Bad credentials".to_string()),
        );
        let error = h
            .pipeline
            .run(&issue_job(), &h.source.token())
            .await
            .unwrap_err();
        assert_eq!(error.class(), ErrorClass::Configuration);
    }

    let comments = h.forge.comments(REPO, 4);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.contains(&configuration_marker(REPO, 4)));
    // Authentication failures are not retried.
    assert_eq!(h.forge.calls("fetch_issue"), 2);
}

// ============================================================================
// Pull request jobs
// ============================================================================

#[tokio::test]
async fn test_pull_request_job_links_issue_and_stores_manifest() {
    let h = harness();
    put_issue(&h.forge);
    put_pull_request(&h.forge, "aaa111", DIFF);

    let outcome = h.pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::PullRequest(PullRequestOutcome::Manifest {
            head_sha: "aaa111".to_string(),
            tests: 1,
            linked_issue: Some(4),
        })
    );

    let record = h.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.validation_status, ValidationStatus::Pending);
    assert_eq!(record.manifest.tests[0].checklist_ids, vec!["C2"]);
    // The checklist was extracted on demand without commenting on the issue.
    assert!(h.store.latest_checklist(REPO, 4).unwrap().is_some());
    assert!(h.forge.comments(REPO, 4).is_empty());

    // Reprocessing opens no second check run.
    h.pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();
    assert_eq!(h.forge.check_runs(REPO).len(), 1);
}

#[tokio::test]
async fn test_stale_pull_request_event_is_dropped() {
    let h = harness();
    put_pull_request(&h.forge, "bbb222", DIFF);

    let error = h
        .pipeline
        .run(&pr_job("aaa111"), &h.source.token())
        .await
        .unwrap_err();
    assert_eq!(error.class(), ErrorClass::ConcurrencyConflict);
    assert!(h.store.pull_request(&pr_id()).unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_pull_request_job_stores_nothing() {
    let h = harness();
    put_pull_request(&h.forge, "aaa111", DIFF);
    h.source.cancel();

    let error = h
        .pipeline
        .run(&pr_job("aaa111"), &h.source.token())
        .await
        .unwrap_err();
    assert_eq!(error.class(), ErrorClass::ConcurrencyConflict);
    assert!(h.store.pull_request(&pr_id()).unwrap().is_none());
}

// ============================================================================
// CI run jobs
// ============================================================================

#[tokio::test]
async fn test_ci_run_scores_signup_example() {
    let h = harness();
    put_issue(&h.forge);
    put_pull_request(&h.forge, "aaa111", DIFF);
    put_report(&h.forge, 77, PASSING_CONFIRM);
    h.pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();

    let outcome = h.pipeline.run(&ci_job(77, "aaa111"), &h.source.token()).await.unwrap();
    let JobOutcome::CiRun(outcome) = outcome else {
        panic!("expected a CI outcome");
    };
    assert_eq!(outcome.report_version, 1);
    assert!((outcome.score - 0.5).abs() < f64::EPSILON);
    assert_eq!(outcome.status, ValidationStatus::NonCompliant);
    assert!(!outcome.eligible);

    let report = h.store.latest_report(&pr_id()).unwrap().unwrap();
    assert_eq!(report.status_of("C1"), Some(ItemStatus::Pending));
    assert_eq!(report.status_of("C2"), Some(ItemStatus::Passed));
    assert_eq!(h.forge.comments(REPO, 12).len(), 1);
    assert_eq!(h.store.merge_decisions(&pr_id()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_ci_run_for_old_head_is_dropped() {
    let h = harness();
    put_pull_request(&h.forge, "bbb222", DIFF);
    put_report(&h.forge, 77, PASSING_CONFIRM);
    h.pipeline.run(&pr_job("bbb222"), &h.source.token()).await.unwrap();

    let error = h
        .pipeline
        .run(&ci_job(77, "aaa111"), &h.source.token())
        .await
        .unwrap_err();
    assert_eq!(error.class(), ErrorClass::ConcurrencyConflict);
    assert!(h.store.latest_report(&pr_id()).unwrap().is_none());
}

#[tokio::test]
async fn test_missing_artifact_yields_diagnostic_report() {
    let h = harness();
    put_issue(&h.forge);
    put_pull_request(&h.forge, "aaa111", DIFF);
    h.pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();

    h.pipeline.run(&ci_job(78, "aaa111"), &h.source.token()).await.unwrap();
    let report = h.store.latest_report(&pr_id()).unwrap().unwrap();
    assert_eq!(report.unmapped_outcomes.len(), 1);
    assert!(autoqa_core::ingest::is_ingest_diagnostic(&report.unmapped_outcomes[0]));
}

#[tokio::test]
async fn test_transient_failure_marks_results_pending() {
    let h = harness();
    put_pull_request(&h.forge, "aaa111", DIFF);
    h.pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();

    for _ in 0..2 {
        h.forge.fail_next(
            "list_run_artifacts",
            ForgeError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            },
        );
    }
    let error = h
        .pipeline
        .run(&ci_job(77, "aaa111"), &h.source.token())
        .await
        .unwrap_err();
    assert_eq!(error.class(), ErrorClass::TransientExternal);

    let record = h.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.validation_status, ValidationStatus::ResultsPending);
}

#[tokio::test]
async fn test_report_comment_failure_still_records_decision() {
    let h = harness();
    put_issue(&h.forge);
    put_pull_request(&h.forge, "aaa111", DIFF);
    put_report(&h.forge, 77, PASSING_CONFIRM);
    h.pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();
    let comments_before = h.forge.comments(REPO, 12).len();

    for _ in 0..2 {
        h.forge.fail_next(
            "post_comment",
            ForgeError::Api {
                status: 503,
                message: "unavailable".to_string(),
            },
        );
    }
    let outcome = h.pipeline.run(&ci_job(77, "aaa111"), &h.source.token()).await.unwrap();
    let JobOutcome::CiRun(outcome) = outcome else {
        panic!("expected a CI outcome");
    };
    assert_eq!(outcome.status, ValidationStatus::NonCompliant);
    assert_eq!(h.forge.comments(REPO, 12).len(), comments_before);
    let completed = h
        .forge
        .check_runs(REPO)
        .into_iter()
        .filter(|(_, request)| request.status == CheckRunStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(h.store.merge_decisions(&pr_id()).unwrap().len(), 1);

    let record = h.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.validation_status, ValidationStatus::NonCompliant);
}

#[tokio::test]
async fn test_compliant_run_merges_when_enabled() {
    let h = harness();
    let pipeline = h.pipeline.with_merge_policy(MergePolicy {
        auto_merge: false,
        repositories: BTreeMap::from([(REPO.to_string(), true)]),
        ..MergePolicy::default()
    });
    put_issue(&h.forge);
    put_pull_request(&h.forge, "aaa111", DIFF_BOTH);
    put_report(&h.forge, 77, PASSING_BOTH);
    h.forge.put_protection(
        REPO,
        12,
        ProtectionSnapshot {
            mergeable: Some(true),
            mergeable_state: "clean".to_string(),
            head_sha: "aaa111".to_string(),
        },
    );
    pipeline.run(&pr_job("aaa111"), &h.source.token()).await.unwrap();

    let outcome = pipeline.run(&ci_job(77, "aaa111"), &h.source.token()).await.unwrap();
    let JobOutcome::CiRun(outcome) = outcome else {
        panic!("expected a CI outcome");
    };
    assert!(outcome.eligible);
    assert!(matches!(outcome.execution, Some(MergeExecution::Merged { .. })));
    assert_eq!(h.forge.merges(REPO).len(), 1);

    let record = h.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.validation_status, ValidationStatus::Merged);

    // A redelivered run records a new report but never merges twice.
    pipeline.run(&ci_job(77, "aaa111"), &h.source.token()).await.unwrap();
    assert_eq!(h.forge.merges(REPO).len(), 1);
    assert_eq!(h.store.reports(&pr_id()).unwrap().len(), 2);
}
