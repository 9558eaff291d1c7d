//! # Error Handling for the Runtime Core
//!
//! All fallible core operations return [`CoreError`] (or its alias
//! [`Result`]). Errors are structured data, not strings: callers branch on
//! variants and fields, and the transport layer maps them onto protocol
//! status codes without parsing messages.
//!
//! Two error families are nested inside [`CoreError`]:
//!
//! - [`ProviderError`]: failures surfaced by an agent provider stream.
//!   These carry a [`ProviderErrorCode`] and a `retryable` flag that the
//!   runtime consults for its backoff loop.
//! - [`ValidationError`]: structural schema violations, carrying the JSON
//!   path of the offending value.
//!
//! Retry timing lives in [`retry::RetryPolicy`].

pub mod retry;

pub use retry::RetryPolicy;

use uuid::Uuid;

/// Convenience alias used across the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The store operation that failed; distinguishes read from write failures
/// so callers can decide whether the event log may have been mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOperation {
    Read,
    Write,
    Delete,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreOperation::Read => write!(f, "read"),
            StoreOperation::Write => write!(f, "write"),
            StoreOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Provider failure classification.
///
/// The set is closed: providers must map vendor-specific failures onto one
/// of these codes so the runtime's retry decision stays uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    RateLimited,
    ContextExceeded,
    AuthFailed,
    Network,
    Unknown,
}

impl std::fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorCode::RateLimited => "RATE_LIMITED",
            ProviderErrorCode::ContextExceeded => "CONTEXT_EXCEEDED",
            ProviderErrorCode::AuthFailed => "AUTH_FAILED",
            ProviderErrorCode::Network => "NETWORK",
            ProviderErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Error surfaced by an agent provider stream.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("provider error [{code}]: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
    pub retryable: bool,
    /// Provider-suggested wait before the next attempt, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            retry_after_ms: None,
        }
    }

    /// A transient network-class failure, eligible for retry.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Network, message, true)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self {
            code: ProviderErrorCode::RateLimited,
            message: message.into(),
            retryable: true,
            retry_after_ms,
        }
    }

    /// A permanent failure that the runtime must not retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unknown, message, false)
    }
}

/// Structural validation failure with the JSON path of the offending value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl std::error::Error for ValidationError {}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "validation failed at {}: {}", path, self.message),
            None => write!(f, "validation failed: {}", self.message),
        }
    }
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

/// Primary error type for all core operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// The session id is not known to the event store or session manager.
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: Uuid },

    /// No workflow definition registered under this name.
    #[error("workflow not found: {name}")]
    WorkflowNotFound { name: String },

    /// The event, snapshot, or recording store failed at the I/O layer.
    ///
    /// Write failures must never be swallowed: an unacknowledged append
    /// means the event is not durable and must not be published.
    #[error("store {operation} failed: {message}")]
    Store {
        operation: StoreOperation,
        message: String,
    },

    /// An agent provider stream terminated with an error.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Structural validation of a value failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Playback mode found no complete recording for the request hash.
    ///
    /// `prompt_head` is a short prefix of the prompt, kept for diagnostics
    /// so operators can tell which call was missing without dumping the
    /// whole prompt into logs.
    #[error("no complete recording for {hash} (prompt: {prompt_head:?})")]
    RecordingNotFound { hash: String, prompt_head: String },

    /// A subscriber callback failed. Diagnostic only: producers are never
    /// affected by handler failures.
    #[error("handler {handler} failed on {event}: {message}")]
    Handler {
        handler: String,
        event: String,
        message: String,
    },

    /// A workflow definition failed build-time validation.
    #[error("invalid workflow {workflow}: {message}")]
    InvalidDefinition { workflow: String, message: String },

    /// JSON (de)serialization failure.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// The session is in a state that does not permit the operation, e.g.
    /// replying to a session that is not awaiting input.
    #[error("session {session_id}: {message}")]
    InvalidSessionState { session_id: Uuid, message: String },
}

impl CoreError {
    pub fn store_read(message: impl Into<String>) -> Self {
        CoreError::Store {
            operation: StoreOperation::Read,
            message: message.into(),
        }
    }

    pub fn store_write(message: impl Into<String>) -> Self {
        CoreError::Store {
            operation: StoreOperation::Write,
            message: message.into(),
        }
    }

    pub fn store_delete(message: impl Into<String>) -> Self {
        CoreError::Store {
            operation: StoreOperation::Delete,
            message: message.into(),
        }
    }

    pub fn recording_not_found(hash: impl Into<String>, prompt: &str) -> Self {
        CoreError::RecordingNotFound {
            hash: hash.into(),
            prompt_head: prompt.chars().take(48).collect(),
        }
    }

    pub fn serialization(err: serde_json::Error) -> Self {
        CoreError::Serialization {
            message: err.to_string(),
        }
    }

    /// Whether the runtime may retry the failed agent call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Provider(p) if p.retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_retryability_reaches_core_error() {
        let transient: CoreError = ProviderError::network("connection reset").into();
        assert!(transient.is_retryable());

        let permanent: CoreError = ProviderError::fatal("bad request").into();
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn recording_not_found_truncates_prompt() {
        let long_prompt = "x".repeat(200);
        let err = CoreError::recording_not_found("abc123", &long_prompt);
        match err {
            CoreError::RecordingNotFound { prompt_head, .. } => {
                assert_eq!(prompt_head.len(), 48);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn store_operation_serializes_lowercase() {
        let json = serde_json::to_string(&StoreOperation::Write).unwrap();
        assert_eq!(json, "\"write\"");
    }
}
