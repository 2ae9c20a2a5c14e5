//! Error types for the recordflow reconciler.
//!
//! The taxonomy separates failures that end a pass (configuration, listing)
//! from failures that are isolated to a single stage or record (completion,
//! write-back). Only the former propagate out of `Reconciler::run_pass`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for recordflow operations.
#[derive(Debug, Error)]
pub enum RecordflowError {
    /// Required configuration (such as the store secret) is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The data store rejected a listing request; the pass cannot trust a partial snapshot.
    #[error("Upstream error: {0}")]
    Upstream(#[source] StoreError),

    /// The completion service failed after all retries.
    #[error("{0}")]
    Completion(#[from] CompletionError),

    /// Writing a record back failed after the single auth retry.
    #[error("{0}")]
    Write(#[from] WriteError),

    /// The pass was cancelled before it could finish.
    #[error("Pass cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordflowError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Short machine-readable kind, used in reports and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Upstream(_) => "UpstreamError",
            Self::Completion(_) => "CompletionError",
            Self::Write(_) => "WriteError",
            Self::Cancelled(_) => "Cancelled",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        }
    }
}

/// Errors reported by the tabular data store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The HTTP request could not be completed.
    #[error("Store transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success HTTP status.
    #[error("Store returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The store answered with a non-zero business code.
    #[error("Store API error {code}: {message}")]
    Api {
        /// Business error code reported by the store.
        code: i64,
        /// Error message reported by the store.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("Malformed store response: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Creates an API error.
    #[must_use]
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Returns the human-readable message carried by the error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(m) | Self::Malformed(m) => m,
            Self::Status { message, .. } | Self::Api { message, .. } => message,
        }
    }
}

/// Failure of a single completion attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt exceeded its timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The service asked the client to slow down (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The body was missing the expected completion text.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Network(String),
}

impl TransportError {
    /// Returns true if the next attempt should wait the longer rate-limit delay.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Status { status: 429, .. })
    }
}

/// Error raised when the completion service cannot produce text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Completion failed after {attempts} attempt(s): {message}")]
pub struct CompletionError {
    /// The last underlying error message.
    pub message: String,
    /// How many attempts were made.
    pub attempts: usize,
    /// Whether the loop stopped because of cancellation rather than exhaustion.
    pub cancelled: bool,
}

impl CompletionError {
    /// Creates a new completion error.
    #[must_use]
    pub fn new(message: impl Into<String>, attempts: usize) -> Self {
        Self {
            message: message.into(),
            attempts,
            cancelled: false,
        }
    }

    /// Creates a completion error for a cancelled retry loop.
    #[must_use]
    pub fn cancelled(attempts: usize) -> Self {
        Self {
            message: "cancelled before completion".to_string(),
            attempts,
            cancelled: true,
        }
    }
}

/// Error raised when a record could not be written back.
#[derive(Debug, Clone, Error)]
#[error("Write failed for record '{record_id}': {source}")]
pub struct WriteError {
    /// The record that failed to write.
    pub record_id: String,
    /// The final store error.
    #[source]
    pub source: StoreError,
    /// Whether the write was retried after an auth failure.
    pub auth_retried: bool,
}

impl WriteError {
    /// Creates a new write error.
    #[must_use]
    pub fn new(record_id: impl Into<String>, source: StoreError) -> Self {
        Self {
            record_id: record_id.into(),
            source,
            auth_retried: false,
        }
    }

    /// Marks the error as coming from the retried attempt.
    #[must_use]
    pub fn after_auth_retry(mut self) -> Self {
        self.auth_retried = true;
        self
    }
}

/// Serializable summary of an error, used in reports and events.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error kind (e.g., "WriteError").
    pub kind: String,
    /// Rendered message.
    pub message: String,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&RecordflowError> for ErrorInfo {
    fn from(err: &RecordflowError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RecordflowError::configuration("no secret").kind(), "ConfigurationError");
        assert_eq!(
            RecordflowError::Upstream(StoreError::api(1254, "bad table")).kind(),
            "UpstreamError"
        );
        assert_eq!(RecordflowError::from(CompletionError::new("timeout", 3)).kind(), "CompletionError");
        assert_eq!(
            RecordflowError::from(WriteError::new("rec1", StoreError::Transport("reset".into()))).kind(),
            "WriteError"
        );
    }

    #[test]
    fn test_store_error_message() {
        let err = StoreError::api(99991663, "Invalid access token");
        assert_eq!(err.message(), "Invalid access token");
        assert!(err.to_string().contains("99991663"));
    }

    #[test]
    fn test_write_error_display() {
        let err = WriteError::new("rec9", StoreError::status(500, "oops")).after_auth_retry();
        assert!(err.auth_retried);
        assert!(err.to_string().contains("rec9"));
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_error_info_from_error() {
        let err = RecordflowError::configuration("FEISHU_APP_SECRET is not set");
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, "ConfigurationError");
        assert!(info.message.contains("FEISHU_APP_SECRET"));
    }

    #[test]
    fn test_transport_rate_limited() {
        assert!(TransportError::RateLimited("slow down".into()).is_rate_limited());
        assert!(TransportError::Status {
            status: 429,
            message: String::new()
        }
        .is_rate_limited());
        assert!(!TransportError::Timeout(120_000).is_rate_limited());
    }

    #[test]
    fn test_completion_error_cancelled() {
        let err = CompletionError::cancelled(1);
        assert!(err.cancelled);
        assert_eq!(err.attempts, 1);
    }
}
