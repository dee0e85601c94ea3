//! Typed errors for the bulk job engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Per-item generation
//! failures are recorded on the item and never surface as [`EngineError`];
//! only store and submission problems do.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while submitting, dispatching or reading jobs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Job does not exist
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    /// A job with this id was already inserted
    #[error("job already exists: {job_id}")]
    DuplicateJob { job_id: Uuid },

    /// A submitted page request is missing fields its mode requires
    #[error("invalid page request at index {index}: {reason}")]
    InvalidRequest { index: usize, reason: String },

    /// Submission contained no page requests
    #[error("job submission has no items")]
    EmptyBatch,
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Storage(Box::new(err))
    }
}

/// Error returned by the page generation service.
///
/// The variant decides what the worker does with the item: transient errors
/// are retried while attempts remain, permanent errors fail the item at once.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Timeouts, upstream 5xx, rate limits, transient I/O
    #[error("transient generation error: {detail}")]
    Transient { detail: String },

    /// The request can never be satisfied as submitted
    #[error("permanent generation error: {detail}")]
    Permanent { detail: String },
}

impl GenerationError {
    pub fn transient(detail: impl Into<String>) -> Self {
        GenerationError::Transient {
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        GenerationError::Permanent {
            detail: detail.into(),
        }
    }

    /// Whether the item should go back to the dispatch pool.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Transient { .. })
    }

    /// The detail message without the classification prefix.
    pub fn detail(&self) -> &str {
        match self {
            GenerationError::Transient { detail } | GenerationError::Permanent { detail } => detail,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(GenerationError::transient("upstream 503").is_retryable());
        assert!(!GenerationError::permanent("missing city").is_retryable());
    }

    #[test]
    fn detail_strips_classification() {
        let err = GenerationError::permanent("missing city");
        assert_eq!(err.detail(), "missing city");
        assert_eq!(err.to_string(), "permanent generation error: missing city");
    }
}
