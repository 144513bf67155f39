//! Error types for the limiter, quota tracker and event trail.
use crate::audit::RecorderError;
use std::fmt;

/// Kind of record an operation addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Bucket,
    Quota,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Bucket => write!(f, "bucket"),
            RecordKind::Quota => write!(f, "quota"),
        }
    }
}

/// Unified error type for limiter and quota operations.
#[derive(thiserror::Error, Debug)]
pub enum LimitError {
    /// A required field was missing or out of range. Nothing was written.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending field name.
        field: &'static str,
        /// Human readable constraint.
        reason: String,
    },
    /// The addressed bucket or quota does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Bucket or quota.
        kind: RecordKind,
        /// Identifier that could not be located.
        id: String,
    },
    /// The backing store could not be consulted, or conditional writes kept losing.
    #[error("store unavailable: {source}")]
    StoreUnavailable {
        /// Underlying backend error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// A conditional write lost an optimistic concurrency race.
    ///
    /// Retried internally; callers only see it wrapped in `StoreUnavailable`
    /// once the retry budget is spent.
    #[error("conditional write on '{id}' lost the race after {attempts} attempts")]
    ConcurrencyConflict {
        /// Record whose version moved underneath us.
        id: String,
        /// Attempts made so far.
        attempts: usize,
    },
    /// The audit trail refused an event.
    #[error("event recording failed: {0}")]
    EventRecording(#[from] RecorderError),
}

impl LimitError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        LimitError::Validation { field, reason: reason.into() }
    }

    pub(crate) fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LimitError::StoreUnavailable { source: Box::new(err) }
    }

    /// Escalate a spent retry budget into `StoreUnavailable`.
    pub(crate) fn conflicts_exhausted(id: impl Into<String>, attempts: usize) -> Self {
        LimitError::store(ConflictsExhausted { id: id.into(), attempts })
    }

    /// Check if this error is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the store could not be consulted.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Check if this error is a single lost race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Validation and not-found errors are final; retrying cannot change the answer.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

/// Source attached to `StoreUnavailable` when the conflict retry budget runs out.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("'{id}' still contended after {attempts} conditional writes")]
pub struct ConflictsExhausted {
    /// Contended record.
    pub id: String,
    /// Total attempts made.
    pub attempts: usize,
}
