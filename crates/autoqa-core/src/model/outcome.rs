//! Normalized CI test outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `(classname, name)`: identifies one test case within a CI run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    /// Test class or suite.
    pub classname: String,
    /// Test case name.
    pub name: String,
}

impl MatchKey {
    /// Creates a match key.
    #[must_use]
    pub fn new(classname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.classname.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}::{}", self.classname, self.name)
        }
    }
}

/// Result of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// No failure, error or skip marker.
    Passed,
    /// Failure or error marker present.
    Failed,
    /// Skip marker present.
    Skipped,
    /// Synthesized when a report could not be ingested.
    Error,
}

impl OutcomeStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    /// Failed and error outcomes dominate an item's status.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized test case result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// `(classname, name)`.
    #[serde(flatten)]
    pub key: MatchKey,
    /// Classified status.
    pub status: OutcomeStatus,
    /// Reported duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Failure or error message, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Manifest or checklist ids attached through report properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explicit_ids: Vec<String>,
}

impl TestOutcome {
    /// Creates an outcome without duration, message or explicit ids.
    #[must_use]
    pub fn new(classname: impl Into<String>, name: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            key: MatchKey::new(classname, name),
            status,
            duration_secs: None,
            failure_message: None,
            explicit_ids: Vec::new(),
        }
    }

    /// Sets the failure message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    /// Adds an explicit manifest or checklist id.
    #[must_use]
    pub fn with_explicit_id(mut self, id: impl Into<String>) -> Self {
        self.explicit_ids.push(id.into());
        self
    }

    /// Test case name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }
}

/// The outcomes of one CI run, bound to the head commit it ran against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiRunResults {
    /// `owner/name`.
    pub repo: String,
    /// Pull request number.
    pub pr_number: u64,
    /// Head commit the CI run tested.
    pub head_commit: String,
    /// Provider run id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    /// Ingested outcomes.
    pub outcomes: Vec<TestOutcome>,
    /// When the results were ingested.
    pub ingested_at: DateTime<Utc>,
}
