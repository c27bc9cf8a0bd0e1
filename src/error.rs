//! Unified error types for the palisade pipeline.
//!
//! Three error kinds cover the failure modes of the guardrail subsystem:
//!
//! - [`SchemaError`] — the classification call returned a payload that does
//!   not satisfy the verdict schema.
//! - [`ProviderError`] — transport, auth, or timeout failure talking to the
//!   classification or agent provider.
//! - [`LogError`] — the interaction store could not persist an outcome.
//!
//! Schema and classification-side provider errors never escape the check
//! engine: they are converted into fail-closed [`SafetyResult`]s there.
//! [`Error`] exists for the remaining fallible surfaces (store setup,
//! direct provider use).
//!
//! [`SafetyResult`]: crate::guardrail::SafetyResult

use std::fmt;

/// Result type alias for palisade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The top-level error type for the palisade crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Provider transport/auth/timeout error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Classification payload failed schema validation.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Interaction store write failure.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A classification payload that could not be decoded into a verdict.
///
/// Carries the raw text exactly as the provider returned it, so the
/// offending payload can be logged and audited alongside the diagnostic.
#[derive(Debug, Clone, thiserror::Error)]
#[error("schema validation failed: {detail}")]
pub struct SchemaError {
    /// The raw payload text that failed to validate.
    pub raw: String,
    /// Human-readable description of what was wrong with it.
    pub detail: String,
}

impl SchemaError {
    /// Create a schema error for the given raw payload.
    #[must_use]
    pub fn new(raw: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            detail: detail.into(),
        }
    }
}

/// Error type for LLM provider operations.
///
/// Covers both the classification call and the agent-response call; the
/// caller decides which side failed from context.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProviderError {
    /// The error kind.
    pub kind: ProviderErrorKind,
    /// The provider name (e.g. `"openai"`), when known.
    pub provider: Option<String>,
    /// Additional error message.
    pub message: String,
    /// Optional error code from the provider (HTTP status, API code).
    pub code: Option<String>,
}

/// Categories of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderErrorKind {
    /// Authentication or authorization failure.
    Auth,
    /// Rate limit exceeded.
    RateLimited,
    /// The request timed out.
    Timeout,
    /// Network or connection error.
    Network,
    /// Non-success HTTP status.
    HttpStatus,
    /// Provider-specific error (malformed completion, missing content).
    Provider,
}

impl ProviderError {
    /// Create an authentication error.
    #[must_use]
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            provider: Some(provider.into()),
            message: message.into(),
            code: None,
        }
    }

    /// Create a rate limit error.
    #[must_use]
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimited,
            provider: Some(provider.into()),
            message: "rate limit exceeded".into(),
            code: None,
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Timeout,
            provider: None,
            message: message.into(),
            code: None,
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Network,
            provider: None,
            message: message.into(),
            code: None,
        }
    }

    /// Create an HTTP status error.
    #[must_use]
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::HttpStatus,
            provider: None,
            message: format!("HTTP {status}: {}", body.into()),
            code: Some(status.to_string()),
        }
    }

    /// Create a provider-specific error.
    #[must_use]
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Provider,
            provider: Some(provider.into()),
            message: message.into(),
            code: None,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited | ProviderErrorKind::Timeout | ProviderErrorKind::Network
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{provider}] ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("request timed out")
        } else if err.is_connect() {
            Self::network(format!("connection failed: {err}"))
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Error type for interaction store operations.
///
/// Store failures are reported to the operator channel but never change the
/// user-visible outcome of a turn.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LogError {
    /// JSON serialization of a stored field failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend rejected the operation.
    #[error("[{backend}] {message}")]
    Storage {
        /// Backend identifier (e.g. `"sqlite"`, `"memory"`).
        backend: &'static str,
        /// Human-readable error description.
        message: String,
    },

    /// Failed to acquire a lock (`Mutex` poisoned by a panic).
    #[error("lock error: {0}")]
    Lock(String),

    /// A blocking task failed to join.
    #[error("task error: {0}")]
    Task(String),
}

impl LogError {
    /// Creates a [`Storage`](Self::Storage) error for the given backend.
    #[must_use]
    pub fn storage(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            backend,
            message: message.into(),
        }
    }

    /// Returns `true` if this is a transient error that may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock(_) | Self::Task(_))
    }
}

/// Enables `?` on [`rusqlite::Error`] inside closures returning [`LogError`].
///
/// `#[from]` cannot be used because the conversion targets the
/// [`Storage`](LogError::Storage) variant, which hardcodes the backend name.
#[cfg(feature = "store-sqlite")]
impl From<rusqlite::Error> for LogError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage("sqlite", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryable_kinds() {
        assert!(ProviderError::rate_limited("openai").is_retryable());
        assert!(ProviderError::timeout("deadline exceeded").is_retryable());
        assert!(ProviderError::network("connection reset").is_retryable());
        assert!(!ProviderError::auth("openai", "bad key").is_retryable());
        assert!(!ProviderError::http_status(500, "oops").is_retryable());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::auth("openai", "invalid api key");
        assert_eq!(err.to_string(), "[openai] invalid api key");

        let err = ProviderError::http_status(429, "slow down");
        assert_eq!(err.to_string(), "HTTP 429: slow down (code: 429)");
    }

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::new("{broken", "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "schema validation failed: unexpected end of input"
        );
        assert_eq!(err.raw, "{broken");
    }

    #[test]
    fn test_log_error_storage() {
        let err = LogError::storage("sqlite", "disk full");
        assert_eq!(err.to_string(), "[sqlite] disk full");
        assert!(!err.is_retryable());
        assert!(LogError::Lock("poisoned".into()).is_retryable());
    }
}
