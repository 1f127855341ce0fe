//! Error types for livetable.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the specific condition instead of parsing messages.

use thiserror::Error;

use crate::document::{DocumentId, PublicationId};

/// Validation errors that occur while checking caller input.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Publication id cannot be empty")]
    EmptyPublicationId,

    #[error("Publication name cannot be empty")]
    EmptyPublicationName,

    #[error("Invalid selector: {reason}")]
    InvalidSelector {
        reason: String,
    },

    #[error("Unsupported selector operator '{operator}'")]
    UnsupportedOperator {
        operator: String,
    },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Sort field cannot be empty")]
    EmptySortField,

    #[error("Invalid document: {reason}")]
    InvalidDocument {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised while a feed or a collection is running.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Document already exists: {id}")]
    DuplicateDocument {
        id: DocumentId,
    },

    #[error("Document not found: {id}")]
    DocumentNotFound {
        id: DocumentId,
    },

    #[error("Change source error: {message}")]
    Source {
        message: String,
    },

    #[error("Subscription '{publication}' is stopped")]
    SubscriptionStopped {
        publication: PublicationId,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// A single matched document could not be turned into a visible row.
#[allow(missing_docs)]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Document is not an object (found {found})")]
    NotAnObject {
        found: &'static str,
    },

    #[error("Document has no '_id' field")]
    MissingId,

    #[error("Document '_id' must be a string or number (found {found})")]
    UnsupportedId {
        found: &'static str,
    },
}

/// Top-level error type for livetable.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FeedError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a change source error.
    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Source {
            message: message.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a projection error.
    #[must_use]
    pub const fn is_projection(&self) -> bool {
        matches!(self, Self::Projection(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Projection(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. } | ExecutionError::Source { .. }
            ),
        }
    }
}

/// Result type alias for livetable operations.
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_regex() {
        let err = ValidationError::InvalidRegex {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("'('"));
        assert!(msg.contains("unclosed group"));
    }

    #[test]
    fn test_execution_error_duplicate() {
        let err = ExecutionError::DuplicateDocument {
            id: DocumentId::new("a"),
        };
        assert!(format!("{err}").contains("already exists: a"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 250 };
        assert!(format!("{err}").contains("250ms"));
    }

    #[test]
    fn test_projection_error_message() {
        let err = ProjectionError::UnsupportedId { found: "array" };
        assert!(format!("{err}").contains("found array"));
    }

    #[test]
    fn test_feed_error_classification() {
        let err: FeedError = ValidationError::EmptyPublicationId.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err: FeedError = ProjectionError::MissingId.into();
        assert!(err.is_projection());
        assert!(!err.is_retryable());

        let err = FeedError::source("backend unavailable");
        assert!(err.is_execution());
        assert!(err.is_retryable());

        let err: FeedError = ExecutionError::SubscriptionStopped {
            publication: PublicationId::new("p1"),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_feed_error_internal() {
        let err = FeedError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
