//! Error types for the corvid workspace.

use thiserror::Error;

/// Result type alias using corvid's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for corvid operations.
///
/// Retryability is a typed property attached where the error is raised
/// (see [`Error::is_retryable`]); callers never inspect message text to
/// decide whether to retry.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Unknown or unregistered job type
    #[error("No handler registered for job type: {0}")]
    UnknownHandler(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Sync pass error
    #[error("Sync error: {0}")]
    Sync(String),

    /// A connector API call failed. `retryable` is decided by the connector
    /// code that raised the error (rate limits, 5xx, and auth expiry are
    /// retryable; other 4xx responses are not).
    #[error("Connector error ({status}): {message}")]
    Connector {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// External rate limit hit; retry after the given delay if known.
    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// External call timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Items were discovered but the pass produced no chunks, a canary for a
    /// silently broken chunking/embedding step, escalated as a pass failure.
    #[error("Pipeline invariant violated: {0}")]
    PipelineInvariant(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a connector error from an HTTP-like status code, classifying
    /// retryability at the raise site: 5xx and auth expiry (401/403) retry,
    /// 429 maps to [`Error::RateLimited`], other 4xx are fatal.
    pub fn connector_status(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            return Error::RateLimited {
                retry_after_secs: None,
            };
        }
        let retryable = status >= 500 || status == 401 || status == 403;
        Error::Connector {
            status,
            message: message.into(),
            retryable,
        }
    }

    /// Whether a failed attempt with this error should be retried with
    /// backoff (true) or dead-lettered immediately (false).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { .. } | Error::Timeout(_) => true,
            Error::Connector { retryable, .. } => *retryable,
            // Transient storage hiccups are worth another attempt; the
            // max-attempts cap bounds pathological cases.
            Error::Database(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Stable machine-readable code recorded on dead-lettered jobs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::NotFound(_) => "not_found",
            Error::Job(_) => "job",
            Error::UnknownHandler(_) => "unknown_handler",
            Error::Embedding(_) => "embedding",
            Error::Sync(_) => "sync",
            Error::Connector { .. } => "connector",
            Error::RateLimited { .. } => "rate_limited",
            Error::Timeout(_) => "timeout",
            Error::PipelineInvariant(_) => "pipeline_invariant",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::InvalidInput(_) => "invalid_input",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_5xx_is_retryable() {
        let err = Error::connector_status(503, "upstream down");
        assert!(err.is_retryable());
        assert_eq!(err.code(), "connector");
    }

    #[test]
    fn connector_4xx_is_fatal() {
        let err = Error::connector_status(404, "gone");
        assert!(!err.is_retryable());
    }

    #[test]
    fn connector_auth_expiry_is_retryable() {
        assert!(Error::connector_status(401, "expired").is_retryable());
        assert!(Error::connector_status(403, "expired").is_retryable());
    }

    #[test]
    fn connector_429_maps_to_rate_limited() {
        let err = Error::connector_status(429, "slow down");
        assert!(matches!(err, Error::RateLimited { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.code(), "rate_limited");
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(Error::Timeout("fetch".into()).is_retryable());
    }

    #[test]
    fn pipeline_invariant_is_fatal() {
        let err = Error::PipelineInvariant("zero chunks".into());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "pipeline_invariant");
    }

    #[test]
    fn invalid_payload_is_fatal() {
        assert!(!Error::InvalidInput("bad payload".into()).is_retryable());
        assert!(!Error::UnknownHandler("eval".into()).is_retryable());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
