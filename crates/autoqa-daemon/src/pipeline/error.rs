//! Pipeline failures and their taxonomy.

use autoqa_core::error::ErrorClass;
use autoqa_core::forge::ForgeError;
use autoqa_core::gate::MergeExecutorError;
use autoqa_core::reconcile::ReconcileError;
use autoqa_core::store::StoreError;
use thiserror::Error;

/// Errors that end a pipeline job.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// A provider call kept failing transiently after its retries.
    #[error("{operation} failed after retries: {source}")]
    TransientExternal {
        /// Provider operation.
        operation: &'static str,
        /// Last failure.
        #[source]
        source: ForgeError,
    },

    /// An input could not be used (unknown resource, unreadable payload).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Credentials or configuration are wrong; retrying will not help.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Newer state superseded this job.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Wraps a provider failure according to its class.
    #[must_use]
    pub fn forge(operation: &'static str, error: ForgeError) -> Self {
        match error.class() {
            ErrorClass::TransientExternal => Self::TransientExternal {
                operation,
                source: error,
            },
            ErrorClass::Configuration => Self::Configuration(format!("{operation}: {error}")),
            ErrorClass::ConcurrencyConflict => {
                Self::ConcurrencyConflict(format!("{operation}: {error}"))
            },
            _ => Self::MalformedInput(format!("{operation}: {error}")),
        }
    }

    /// Maps the error into the pipeline taxonomy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::TransientExternal { .. } => ErrorClass::TransientExternal,
            Self::MalformedInput(_) => ErrorClass::MalformedInput,
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::ConcurrencyConflict(_) => ErrorClass::ConcurrencyConflict,
            Self::Store(error) => error.class(),
        }
    }
}

impl From<ReconcileError> for PipelineError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::InvalidThreshold { .. } => Self::Configuration(value.to_string()),
            _ => Self::ConcurrencyConflict(value.to_string()),
        }
    }
}

impl From<MergeExecutorError> for PipelineError {
    fn from(value: MergeExecutorError) -> Self {
        match value {
            MergeExecutorError::Store(error) => Self::Store(error),
            other => Self::MalformedInput(other.to_string()),
        }
    }
}
