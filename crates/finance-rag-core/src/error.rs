//! Error taxonomy shared by every Finance RAG component.
//!
//! Errors that belong to one unit of work (a single uploaded document, a
//! single generation backend) are turned into structured partial results
//! by the caller. Errors on shared infrastructure ([`RagError::IndexUnavailable`])
//! abort the operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Configuration is inconsistent (e.g. chunk overlap ≥ chunk size,
    /// or an index built with a different embedding model).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied argument is out of range (e.g. `top_k < 1`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The vector index backing store cannot be reached or written.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A single document could not be ingested.
    #[error("cannot ingest document {document_id}: {reason}")]
    IngestItem { document_id: String, reason: String },
}

impl RagError {
    /// Whether the error concerns shared infrastructure and must abort a
    /// whole batch rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RagError::IndexUnavailable(_))
    }
}

/// Failure category reported by a generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Network failure, timeout, non-retryable HTTP status, or service down.
    Unavailable,
    /// The provider answered HTTP 429.
    RateLimited,
    /// The provider answered but the body was empty or unparseable.
    InvalidResponse,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendErrorKind::Unavailable => "unavailable",
            BackendErrorKind::RateLimited => "rate_limited",
            BackendErrorKind::InvalidResponse => "invalid_response",
        };
        f.write_str(s)
    }
}

/// Error produced by one generation backend for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::RateLimited,
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::InvalidResponse,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_index_errors_are_fatal() {
        assert!(RagError::IndexUnavailable("down".into()).is_fatal());
        assert!(!RagError::Embedding("bad".into()).is_fatal());
        assert!(!RagError::IngestItem {
            document_id: "d".into(),
            reason: "empty".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::rate_limited("HTTP 429");
        assert_eq!(err.to_string(), "rate_limited: HTTP 429");
        let wrapped: RagError = err.into();
        assert_eq!(wrapped.to_string(), "rate_limited: HTTP 429");
    }

    #[test]
    fn test_backend_error_serializes_kind_snake_case() {
        let err = BackendError::invalid_response("empty body");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalid_response");
        assert_eq!(json["message"], "empty body");
    }
}
