//! Failure taxonomy shared by every pipeline stage.
//!
//! Module errors stay specific (`ForgeError`, `StoreError`, ...); each maps
//! into an [`ErrorClass`] that decides how the pipeline reacts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limits, 5xx, transport. Retried with backoff, then the pull
    /// request degrades to `results_pending`.
    TransientExternal,
    /// Unreadable payloads or documents. Degrades to a best-effort result.
    MalformedInput,
    /// A negative merge decision. Recorded, never an error for the caller.
    PolicyViolation,
    /// Missing or rejected credentials, bad settings. Fatal for the event
    /// only; explained in a comment.
    Configuration,
    /// Work for a superseded head commit. Dropped after logging.
    ConcurrencyConflict,
}

impl ErrorClass {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientExternal => "transient_external",
            Self::MalformedInput => "malformed_input",
            Self::PolicyViolation => "policy_violation",
            Self::Configuration => "configuration",
            Self::ConcurrencyConflict => "concurrency_conflict",
        }
    }

    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientExternal)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
