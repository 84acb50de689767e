//! Inbound event records and their classification.
//!
//! The transport in front of the daemon (a webhook receiver, a queue
//! consumer, a replay script) hands over [`EventRecord`]s. This module turns
//! them into typed [`ClassifiedEvent`]s; it performs no I/O and claims
//! nothing. Deduplication by delivery id belongs to the router, which claims
//! the id in the [`crate::store::Store`] before any side effect.
//!
//! # Classification
//!
//! ```text
//! event_type     action                                     class
//! -------------  -----------------------------------------  ------------
//! issues         opened | edited | reopened                 Issue
//! pull_request   opened | synchronize | reopened | edited   PullRequest
//! workflow_run   completed                                  CiRun
//! anything else                                             Ignored
//! ```
//!
//! A payload that does not decode into the class's shape is
//! [`ClassifiedEvent::Malformed`] and is never dispatched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{PrId, RepoRef};

/// Issue actions that (re)generate a checklist.
pub const ISSUE_ACTIONS: &[&str] = &["opened", "edited", "reopened"];

/// Pull request actions that (re)generate a manifest.
pub const PULL_REQUEST_ACTIONS: &[&str] = &["opened", "synchronize", "reopened", "edited"];

/// Workflow run actions that trigger ingestion.
pub const CI_RUN_ACTIONS: &[&str] = &["completed"];

/// One delivery from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Provider event name, e.g. `pull_request`.
    pub event_type: String,
    /// Unique delivery id assigned by the provider.
    pub delivery_id: String,
    /// `owner/name`. May be empty when the payload carries the repository.
    #[serde(default)]
    pub repo: String,
    /// Raw provider payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// An issue event that needs a checklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueEvent {
    /// Repository and installation.
    pub repo: RepoRef,
    /// Issue number.
    pub number: u64,
    /// Provider action.
    pub action: String,
}

/// A pull request event that needs a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    /// Repository and installation.
    pub repo: RepoRef,
    /// Pull request number.
    pub number: u64,
    /// Provider action.
    pub action: String,
    /// Head commit named by the event.
    pub head_sha: String,
}

impl PullRequestEvent {
    /// Returns the pull request id.
    #[must_use]
    pub fn pr_id(&self) -> PrId {
        PrId::new(self.repo.full_name.clone(), self.number)
    }
}

/// A completed CI run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiRunEvent {
    /// Repository and installation.
    pub repo: RepoRef,
    /// Provider run id.
    pub run_id: u64,
    /// Workflow name, for logs.
    pub workflow_name: String,
    /// Commit the run tested.
    pub head_sha: String,
    /// Pull requests the provider associated with the run. May be empty,
    /// e.g. for runs from forks; the router then resolves by head commit.
    pub pull_requests: Vec<u64>,
    /// Run conclusion (`success`, `failure`, ...), when reported.
    pub conclusion: Option<String>,
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    /// Checklist work.
    Issue(IssueEvent),
    /// Manifest work.
    PullRequest(PullRequestEvent),
    /// Ingestion and reconciliation work.
    CiRun(CiRunEvent),
    /// Acknowledged and dropped.
    Ignored {
        /// Why the event needs no work.
        reason: String,
    },
    /// Acknowledged and dropped; the payload was unreadable.
    Malformed {
        /// Decode failure.
        reason: String,
    },
}

impl ClassifiedEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Issue(_) => "issue",
            Self::PullRequest(_) => "pull_request",
            Self::CiRun(_) => "ci_run",
            Self::Ignored { .. } => "ignored",
            Self::Malformed { .. } => "malformed",
        }
    }

    /// Whether the event produces pipeline work.
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        matches!(self, Self::Issue(_) | Self::PullRequest(_) | Self::CiRun(_))
    }
}

/// Serialization key for pipeline work.
///
/// Work for equal keys runs one at a time; work for distinct keys runs
/// concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkKey {
    /// `(repo, issue)`.
    Issue {
        /// `owner/name`.
        repo: String,
        /// Issue number.
        number: u64,
    },
    /// `(repo, pr)`. The head commit is the lane generation.
    PullRequest {
        /// `owner/name`.
        repo: String,
        /// Pull request number.
        number: u64,
    },
}

impl WorkKey {
    /// Key for checklist work on an issue.
    #[must_use]
    pub fn issue(repo: impl Into<String>, number: u64) -> Self {
        Self::Issue {
            repo: repo.into(),
            number,
        }
    }

    /// Key for manifest and reconciliation work on a pull request.
    #[must_use]
    pub fn pull_request(repo: impl Into<String>, number: u64) -> Self {
        Self::PullRequest {
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue { repo, number } => write!(f, "issue:{repo}#{number}"),
            Self::PullRequest { repo, number } => write!(f, "pr:{repo}#{number}"),
        }
    }
}

// Payload shapes. Only the fields the pipeline reads are declared; serde
// ignores the rest of the provider payload.

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct InstallationPayload {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    repository: Option<RepositoryPayload>,
    #[serde(default)]
    installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
struct IssuesPayload {
    issue: IssueBody,
}

#[derive(Debug, Deserialize)]
struct IssueBody {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    pull_request: PullRequestBody,
}

#[derive(Debug, Deserialize)]
struct PullRequestBody {
    number: u64,
    head: HeadBody,
}

#[derive(Debug, Deserialize)]
struct HeadBody {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunPayload {
    workflow_run: WorkflowRunBody,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunBody {
    id: u64,
    #[serde(default)]
    name: String,
    head_sha: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: u64,
}

/// Classifies an event record.
#[must_use]
pub fn classify(record: &EventRecord) -> ClassifiedEvent {
    let envelope = match Envelope::deserialize(&record.payload) {
        Ok(envelope) => envelope,
        Err(e) => return malformed(format!("unreadable payload: {e}")),
    };
    let action = envelope.action.clone().unwrap_or_default();

    let supported = match record.event_type.as_str() {
        "issues" => ISSUE_ACTIONS,
        "pull_request" => PULL_REQUEST_ACTIONS,
        "workflow_run" => CI_RUN_ACTIONS,
        other => {
            return ClassifiedEvent::Ignored {
                reason: format!("unsupported event type '{other}'"),
            };
        },
    };
    if !supported.contains(&action.as_str()) {
        return ClassifiedEvent::Ignored {
            reason: format!("unsupported action '{action}' for {}", record.event_type),
        };
    }

    let repo = match repo_ref(record, &envelope) {
        Ok(repo) => repo,
        Err(reason) => return malformed(reason),
    };

    match record.event_type.as_str() {
        "issues" => match IssuesPayload::deserialize(&record.payload) {
            Ok(payload) => ClassifiedEvent::Issue(IssueEvent {
                repo,
                number: payload.issue.number,
                action,
            }),
            Err(e) => malformed(format!("invalid issues payload: {e}")),
        },
        "pull_request" => match PullRequestPayload::deserialize(&record.payload) {
            Ok(payload) if payload.pull_request.head.sha.is_empty() => {
                malformed("pull request payload has an empty head sha".to_string())
            },
            Ok(payload) => ClassifiedEvent::PullRequest(PullRequestEvent {
                repo,
                number: payload.pull_request.number,
                action,
                head_sha: payload.pull_request.head.sha,
            }),
            Err(e) => malformed(format!("invalid pull_request payload: {e}")),
        },
        _ => match WorkflowRunPayload::deserialize(&record.payload) {
            Ok(payload) => {
                let run = payload.workflow_run;
                let mut pull_requests: Vec<u64> =
                    run.pull_requests.iter().map(|pr| pr.number).collect();
                pull_requests.sort_unstable();
                pull_requests.dedup();
                ClassifiedEvent::CiRun(CiRunEvent {
                    repo,
                    run_id: run.id,
                    workflow_name: run.name,
                    head_sha: run.head_sha,
                    pull_requests,
                    conclusion: run.conclusion,
                })
            },
            Err(e) => malformed(format!("invalid workflow_run payload: {e}")),
        },
    }
}

fn malformed(reason: String) -> ClassifiedEvent {
    ClassifiedEvent::Malformed { reason }
}

/// Resolves the repository from the record and the payload, which must
/// agree when both are present.
fn repo_ref(record: &EventRecord, envelope: &Envelope) -> Result<RepoRef, String> {
    let from_payload = envelope.repository.as_ref().map(|r| r.full_name.as_str());
    let full_name = match (record.repo.trim(), from_payload) {
        ("", None) => return Err("event names no repository".to_string()),
        ("", Some(payload)) => payload,
        (declared, Some(payload)) if !declared.eq_ignore_ascii_case(payload) => {
            return Err(format!(
                "record repository '{declared}' does not match payload repository '{payload}'"
            ));
        },
        (declared, _) => declared,
    };
    if full_name.split_once('/').is_none_or(|(owner, name)| owner.is_empty() || name.is_empty()) {
        return Err(format!("repository '{full_name}' is not owner/name"));
    }

    let repo = RepoRef::new(full_name);
    Ok(match &envelope.installation {
        Some(installation) => repo.with_installation(installation.id),
        None => repo,
    })
}
