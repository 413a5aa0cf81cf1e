//! Error types shared across the Maestro workspace.
//!
//! The error kinds form a closed set. Retryable kinds carry an optional
//! [`TransientErrorKind`] that adapters and providers consult against the
//! configured retry policy; everything else is terminal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Classification of transient failures that may be retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransientErrorKind {
    /// Upstream rate limiting (HTTP 429 or vendor-specific throttle).
    RateLimited,
    /// The call exceeded its deadline.
    Timeout,
    /// Connection could not be established or was dropped.
    Connection,
    /// Transient server-side status (5xx).
    TransientStatus,
}

impl std::fmt::Display for TransientErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransientErrorKind::RateLimited => "rate_limited",
            TransientErrorKind::Timeout => "timeout",
            TransientErrorKind::Connection => "connection",
            TransientErrorKind::TransientStatus => "transient_status",
        };
        write!(f, "{}", s)
    }
}

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The configuration document was rejected by the loader.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A tool/agent/model id did not resolve.
    #[error("unresolved reference: {0}")]
    ReferenceUnresolved(String),

    /// Missing environment variables or a bad endpoint.
    #[error("provider misconfigured: {0}")]
    ProviderMisconfigured(String),

    /// Tool source or parameters inconsistent with its adapter.
    #[error("tool validation failed: {0}")]
    ToolValidationFailed(String),

    /// A tool call failed; retryable when `kind` matches the policy.
    #[error("tool execution failed: {message}")]
    ToolExecutionFailed {
        message: String,
        kind: Option<TransientErrorKind>,
    },

    /// A chat or embedding call failed; retryable when `kind` matches.
    #[error("model call failed: {message}")]
    ModelCallFailed {
        message: String,
        kind: Option<TransientErrorKind>,
    },

    /// `max_iterations`/`max_rounds`/`max_stall` was reached.
    #[error("iteration budget exhausted: {0}")]
    IterationBudgetExhausted(String),

    /// The caller cancelled the run.
    #[error("execution cancelled")]
    Cancelled,

    /// Stored vectors were generated under a different embedding signature.
    #[error("embedding signature mismatch: {0}")]
    EmbeddingSignatureMismatch(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        WorkerError::ConfigInvalid(msg.into())
    }

    pub fn reference(msg: impl Into<String>) -> Self {
        WorkerError::ReferenceUnresolved(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        WorkerError::ProviderMisconfigured(msg.into())
    }

    pub fn tool_validation(msg: impl Into<String>) -> Self {
        WorkerError::ToolValidationFailed(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        WorkerError::ToolExecutionFailed {
            message: msg.into(),
            kind: None,
        }
    }

    pub fn tool_transient(msg: impl Into<String>, kind: TransientErrorKind) -> Self {
        WorkerError::ToolExecutionFailed {
            message: msg.into(),
            kind: Some(kind),
        }
    }

    pub fn model(msg: impl Into<String>) -> Self {
        WorkerError::ModelCallFailed {
            message: msg.into(),
            kind: None,
        }
    }

    pub fn model_transient(msg: impl Into<String>, kind: TransientErrorKind) -> Self {
        WorkerError::ModelCallFailed {
            message: msg.into(),
            kind: Some(kind),
        }
    }

    pub fn budget(msg: impl Into<String>) -> Self {
        WorkerError::IterationBudgetExhausted(msg.into())
    }

    pub fn embedding_mismatch(msg: impl Into<String>) -> Self {
        WorkerError::EmbeddingSignatureMismatch(msg.into())
    }

    /// Transient classification, if any.
    pub fn transient_kind(&self) -> Option<TransientErrorKind> {
        match self {
            WorkerError::ToolExecutionFailed { kind, .. } => *kind,
            WorkerError::ModelCallFailed { kind, .. } => *kind,
            _ => None,
        }
    }

    /// Whether this failure may be retried under the given allow-list.
    pub fn is_retryable(&self, allowed: &[TransientErrorKind]) -> bool {
        self.transient_kind()
            .map(|k| allowed.contains(&k))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = WorkerError::tool_transient("timed out", TransientErrorKind::Timeout);
        assert_eq!(err.transient_kind(), Some(TransientErrorKind::Timeout));
        assert!(err.is_retryable(&[TransientErrorKind::Timeout]));
        assert!(!err.is_retryable(&[TransientErrorKind::Connection]));
    }

    #[test]
    fn test_non_retryable_kinds() {
        let err = WorkerError::reference("tool 'x' not found");
        assert_eq!(err.transient_kind(), None);
        assert!(!err.is_retryable(&[
            TransientErrorKind::RateLimited,
            TransientErrorKind::Timeout,
            TransientErrorKind::Connection,
            TransientErrorKind::TransientStatus,
        ]));
    }

    #[test]
    fn test_transient_kind_serialization() {
        let serialized = serde_json::to_string(&TransientErrorKind::RateLimited).unwrap();
        assert_eq!(serialized, "\"rate_limited\"");

        let parsed: TransientErrorKind = serde_json::from_str("\"transient_status\"").unwrap();
        assert_eq!(parsed, TransientErrorKind::TransientStatus);
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::config("missing workflow");
        assert_eq!(err.to_string(), "invalid configuration: missing workflow");

        let err = WorkerError::Cancelled;
        assert_eq!(err.to_string(), "execution cancelled");
    }
}
