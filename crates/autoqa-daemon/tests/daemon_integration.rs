//! Integration tests for the event daemon.
//!
//! Events go through the full intake path against in-memory collaborators:
//!
//! ```text
//! EventRecord -> EventRouter -> WorkQueue -> Pipeline -> InMemoryForge / InMemoryStore
//! ```

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use autoqa_core::clock::FixedClock;
use autoqa_core::events::{EventRecord, WorkKey};
use autoqa_core::forge::{Artifact, ForgeError, InMemoryForge, IssueSnapshot, PullRequestSnapshot};
use autoqa_core::model::{ChangedFile, FileStatus, ItemStatus, PrId, ValidationStatus};
use autoqa_core::retry::RetryPolicy;
use autoqa_core::store::{InMemoryStore, Store};
use autoqa_daemon::pipeline::Pipeline;
use autoqa_daemon::queue::WorkQueue;
use autoqa_daemon::router::{Ack, EventRouter};
use chrono::{TimeZone, Utc};
use serde_json::json;
use zip::write::SimpleFileOptions;

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

const PASSING_CONFIRM: &str = r#"<testsuite name="signup">
  <testcase classname="signup.spec" name="test_confirmSignup_autoqa" time="0.02"/>
</testsuite>"#;

struct Daemon {
    forge: Arc<InMemoryForge>,
    store: Arc<InMemoryStore>,
    queue: Arc<WorkQueue>,
    router: Arc<EventRouter>,
}

fn daemon() -> Daemon {
    let forge = Arc::new(InMemoryForge::new());
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::new(
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
    ));
    let pipeline = Pipeline::new(forge.clone(), store.clone(), clock).with_retry(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
        jitter: 0.0,
    });
    let queue = Arc::new(WorkQueue::new(4));
    let router = Arc::new(EventRouter::new(
        store.clone(),
        queue.clone(),
        Arc::new(pipeline),
    ));
    Daemon {
        forge,
        store,
        queue,
        router,
    }
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

fn seed_issue(forge: &InMemoryForge) {
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

fn seed_pull_request(forge: &InMemoryForge, head: &str) {
    forge.put_pull_request(
        REPO,
        PullRequestSnapshot {
            number: 12,
            title: "Confirm signups".to_string(),
            body: "Closes #4".to_string(),
            head_sha: head.to_string(),
            head_ref: "feature/confirm".to_string(),
            base_ref: "main".to_string(),
            ..PullRequestSnapshot::default()
        },
        DIFF,
        vec![ChangedFile::new("src/signup.js", FileStatus::Modified)],
    );
}

fn seed_run(forge: &InMemoryForge, run_id: u64) {
    forge.put_artifact(
        REPO,
        run_id,
        Artifact {
            id: run_id + 1000,
            name: "autoqa-junit".to_string(),
            size_in_bytes: 512,
            expired: false,
        },
        zip_of(&[("signup.xml", PASSING_CONFIRM), ("notes.txt", "ignored")]),
    );
}

fn issue_event(delivery_id: &str) -> EventRecord {
    EventRecord {
        event_type: "issues".to_string(),
        delivery_id: delivery_id.to_string(),
        repo: REPO.to_string(),
        payload: json!({
            "action": "opened",
            "issue": { "number": 4 },
            "repository": { "full_name": REPO }
        }),
    }
}

fn pull_request_event(delivery_id: &str, action: &str, head: &str) -> EventRecord {
    EventRecord {
        event_type: "pull_request".to_string(),
        delivery_id: delivery_id.to_string(),
        repo: REPO.to_string(),
        payload: json!({
            "action": action,
            "pull_request": { "number": 12, "head": { "sha": head } },
            "repository": { "full_name": REPO }
        }),
    }
}

fn workflow_run_event(delivery_id: &str, run_id: u64, head: &str, prs: &[u64]) -> EventRecord {
    let pull_requests: Vec<serde_json::Value> =
        prs.iter().map(|number| json!({ "number": number })).collect();
    EventRecord {
        event_type: "workflow_run".to_string(),
        delivery_id: delivery_id.to_string(),
        repo: REPO.to_string(),
        payload: json!({
            "action": "completed",
            "workflow_run": {
                "id": run_id,
                "name": "ci",
                "head_sha": head,
                "conclusion": "success",
                "pull_requests": pull_requests
            },
            "repository": { "full_name": REPO }
        }),
    }
}

fn pr_id() -> PrId {
    PrId::new(REPO, 12)
}

// ============================================================================
// Delivery semantics
// ============================================================================

#[tokio::test]
async fn test_replayed_delivery_has_one_effect() {
    let d = daemon();
    seed_issue(&d.forge);

    let event = issue_event("delivery-1");
    assert!(matches!(d.router.route(&event).unwrap(), Ack::Accepted { .. }));
    d.queue.drain().await;
    assert_eq!(d.router.route(&event).unwrap(), Ack::Duplicate);
    d.queue.drain().await;

    assert_eq!(d.forge.comments(REPO, 4).len(), 1);
    assert_eq!(d.store.checklist_versions(REPO, 4).unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_are_accepted_once() {
    let d = daemon();
    seed_issue(&d.forge);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let router = Arc::clone(&d.router);
        tasks.spawn(async move { router.route(&issue_event("delivery-race")).unwrap() });
    }
    let mut accepted = 0;
    while let Some(ack) = tasks.join_next().await {
        if matches!(ack.unwrap(), Ack::Accepted { .. }) {
            accepted += 1;
        }
    }
    d.queue.drain().await;

    assert_eq!(accepted, 1);
    assert_eq!(d.forge.comments(REPO, 4).len(), 1);
}

#[tokio::test]
async fn test_lost_comment_response_is_not_reposted() {
    let d = daemon();
    seed_issue(&d.forge);
    d.forge.lose_next_response(
        "post_comment",
        ForgeError::Transport("connection reset by peer".to_string()),
    );

    d.router.route(&issue_event("delivery-lost")).unwrap();
    d.queue.drain().await;

    assert_eq!(d.forge.comments(REPO, 4).len(), 1);
    assert_eq!(d.forge.calls("post_comment"), 1);
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_signup_flow_end_to_end() {
    let d = daemon();
    seed_issue(&d.forge);
    seed_pull_request(&d.forge, "aaa111");
    seed_run(&d.forge, 501);

    d.router.route(&issue_event("e-1")).unwrap();
    d.queue.drain().await;
    let ack = d
        .router
        .route(&pull_request_event("e-2", "opened", "aaa111"))
        .unwrap();
    assert_eq!(
        ack,
        Ack::Accepted {
            keys: vec![WorkKey::pull_request(REPO, 12)]
        }
    );
    d.queue.drain().await;
    d.router
        .route(&workflow_run_event("e-3", 501, "aaa111", &[12]))
        .unwrap();
    d.queue.drain().await;

    let report = d.store.latest_report(&pr_id()).unwrap().unwrap();
    assert_eq!(report.version, 1);
    assert_eq!(report.status_of("C1"), Some(ItemStatus::Pending));
    assert_eq!(report.status_of("C2"), Some(ItemStatus::Passed));
    assert!((report.score - 0.5).abs() < f64::EPSILON);

    let record = d.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.linked_issue_id, Some(4));
    assert_eq!(record.validation_status, ValidationStatus::NonCompliant);

    // One checklist comment on the issue, one report comment on the PR.
    assert_eq!(d.forge.comments(REPO, 4).len(), 1);
    assert_eq!(d.forge.comments(REPO, 12).len(), 1);
    // In-progress check run from the manifest, completed one from the report.
    assert_eq!(d.forge.check_runs(REPO).len(), 2);

    let decisions = d.store.merge_decisions(&pr_id()).unwrap();
    assert_eq!(decisions.len(), 1);
    assert!(!decisions[0].eligible);
    assert!(d.forge.merges(REPO).is_empty());
}

#[tokio::test]
async fn test_fork_run_is_matched_by_head_commit() {
    let d = daemon();
    seed_pull_request(&d.forge, "aaa111");
    seed_run(&d.forge, 502);

    d.router
        .route(&pull_request_event("f-1", "opened", "aaa111"))
        .unwrap();
    d.queue.drain().await;
    let ack = d
        .router
        .route(&workflow_run_event("f-2", 502, "aaa111", &[]))
        .unwrap();
    assert_eq!(
        ack,
        Ack::Accepted {
            keys: vec![WorkKey::pull_request(REPO, 12)]
        }
    );
    d.queue.drain().await;

    assert!(d.store.latest_report(&pr_id()).unwrap().is_some());
}

// ============================================================================
// Superseding and degradation
// ============================================================================

#[tokio::test]
async fn test_synchronize_supersedes_previous_head() {
    let d = daemon();
    seed_issue(&d.forge);
    seed_pull_request(&d.forge, "aaa111");
    seed_run(&d.forge, 601);
    seed_run(&d.forge, 602);

    d.router
        .route(&pull_request_event("s-1", "opened", "aaa111"))
        .unwrap();
    d.queue.drain().await;

    // The branch moves before the first run's results arrive.
    seed_pull_request(&d.forge, "bbb222");
    d.router
        .route(&pull_request_event("s-2", "synchronize", "bbb222"))
        .unwrap();
    d.router
        .route(&workflow_run_event("s-3", 601, "aaa111", &[12]))
        .unwrap();
    d.queue.drain().await;

    let record = d.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.head_commit, "bbb222");
    assert!(d.store.latest_report(&pr_id()).unwrap().is_none());

    // The old manifest is kept, marked superseded.
    let old = d.store.manifest_for(&pr_id(), "aaa111").unwrap().unwrap();
    assert_eq!(old.superseded_by.as_deref(), Some("bbb222"));

    d.router
        .route(&workflow_run_event("s-4", 602, "bbb222", &[12]))
        .unwrap();
    d.queue.drain().await;
    let report = d.store.latest_report(&pr_id()).unwrap().unwrap();
    assert_eq!(report.head_commit, "bbb222");
    assert_eq!(report.version, 1);
}

#[tokio::test]
async fn test_provider_outage_degrades_to_results_pending() {
    let d = daemon();
    seed_pull_request(&d.forge, "aaa111");
    d.router
        .route(&pull_request_event("o-1", "opened", "aaa111"))
        .unwrap();
    d.queue.drain().await;

    for _ in 0..3 {
        d.forge.fail_next(
            "list_run_artifacts",
            ForgeError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            },
        );
    }
    d.router
        .route(&workflow_run_event("o-2", 701, "aaa111", &[12]))
        .unwrap();
    d.queue.drain().await;

    let record = d.store.pull_request(&pr_id()).unwrap().unwrap();
    assert_eq!(record.validation_status, ValidationStatus::ResultsPending);
    assert!(d.store.latest_report(&pr_id()).unwrap().is_none());
    assert_eq!(d.forge.calls("list_run_artifacts"), 3);
}
