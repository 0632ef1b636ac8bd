//! Error types shared by the fetch, embedding, export and orchestration stages.
//!
//! Provider clients never leak `reqwest` or `serde` errors: every failure is
//! folded into a [`FetchError`] carrying one [`ErrorKind`] from the shared
//! taxonomy. The retry policy and the orchestrator only ever look at the kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Classification of a failed provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing request parameters. Never retried.
    Validation,
    /// Rejected credentials. Never retried.
    Authentication,
    /// Quota or rate limit hit. Retried, honouring any retry-after hint.
    RateLimit,
    /// 5xx, request timeout, dropped connection. Retried with backoff.
    TransientServer,
    /// The provider answered with something we could not decode.
    MalformedResponse,
}

impl ErrorKind {
    /// Whether the default retry policy treats this kind as retryable.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::TransientServer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::TransientServer => "transient_server",
            ErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one provider request.
///
/// `attempts` is filled in by the retry policy; a client constructing the
/// error always reports a single attempt.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{provider}: {kind} error: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub provider: String,
    pub message: String,
    /// HTTP status that produced the error, when there was one.
    pub status: Option<u16>,
    /// Provider supplied retry-after hint.
    pub retry_after: Option<Duration>,
    pub attempts: u32,
}

impl FetchError {
    pub fn new(kind: ErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            message: message.into(),
            status: None,
            retry_after: None,
            attempts: 1,
        }
    }

    pub fn validation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, provider, message)
    }

    pub fn authentication(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, provider, message)
    }

    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, provider, message)
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientServer, provider, message)
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, provider, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Map a transport-level `reqwest` error onto the taxonomy.
    ///
    /// Timeouts and connection failures are transient; a body that fails to
    /// decode is malformed; anything carrying a status is classified by it.
    pub fn from_transport(provider: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::new(
                crate::providers::http::kind_for_status(status.as_u16()),
                provider,
                err.to_string(),
            )
            .with_status(status.as_u16());
        }
        if err.is_decode() {
            return Self::malformed(provider, err.to_string());
        }
        Self::transient(provider, err.to_string())
    }
}

/// Failure of the embedding capability for a single text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
    #[error("embedding has dimension {actual}, index expects {expected}")]
    Dimension { expected: usize, actual: usize },
}

/// Configuration could not be loaded or is internally inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by the orchestrator's control surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run {0} is already running")]
    AlreadyRunning(Uuid),
    #[error("no run is active")]
    NoActiveRun,
    #[error("run task aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of the export collaborator.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retryable_kinds() {
        assert!(ErrorKind::RateLimit.is_retryable_by_default());
        assert!(ErrorKind::TransientServer.is_retryable_by_default());
        assert!(!ErrorKind::Validation.is_retryable_by_default());
        assert!(!ErrorKind::Authentication.is_retryable_by_default());
        assert!(!ErrorKind::MalformedResponse.is_retryable_by_default());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::authentication("gnews", "invalid api key").with_status(401);
        assert_eq!(err.to_string(), "gnews: authentication error: invalid api key");
        assert_eq!(err.status, Some(401));
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TransientServer).unwrap();
        assert_eq!(json, "\"transient_server\"");
    }
}
