//! Error taxonomy for calls to the protected dependency.
//!
//! # Data Flow
//! ```text
//! transport failure (ApiError)
//!     → classify.rs (process_error: kind, code, status, retryability)
//!     → ClassifiedError
//!     → retry orchestrator decides: refresh / back off / surface
//!     → ErrorPayload (user-facing JSON)
//!
//! Batch calls:
//!     → batch.rs (partition item responses, aggregate by severity)
//! ```
//!
//! # Design Decisions
//! - One raw error type for every layer; classification is a pure function of it
//! - A breaker-open rejection is its own variant so nothing retries into it
//! - Classified errors are values: created per failure, never persisted

pub mod batch;
pub mod classify;

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use batch::{aggregate_errors, handle_batch_errors, BatchItem, BatchItemResponse, BatchOutcome};
pub use classify::process_error;

/// Raw failure produced by an outbound call or by one of the resilience layers.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The dependency answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        /// Service-specific error code from the response body, if any.
        code: Option<String>,
        message: String,
        /// Parsed `retry-after` hint.
        retry_after: Option<Duration>,
    },

    /// Connection could not be established or was reset.
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Rejected by an open circuit breaker without calling the dependency.
    #[error("Circuit breaker '{resource}' is open")]
    CircuitOpen {
        resource: String,
        /// Time left until the breaker admits a probe.
        retry_in: Duration,
    },

    /// An error that has already been classified.
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ApiError::Http {
            status,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a 429 error carrying a `retry-after` hint.
    pub fn throttled(retry_after: Option<Duration>) -> Self {
        ApiError::Http {
            status: 429,
            code: None,
            message: "Too many requests".to_string(),
            retry_after,
        }
    }

    /// Builds an HTTP error from a `{"error": {"code", "message"}}` response body.
    pub fn from_error_body(
        status: u16,
        body: Option<&serde_json::Value>,
        retry_after: Option<Duration>,
        fallback_message: impl FnOnce() -> String,
    ) -> Self {
        let error = body.and_then(|b| b.get("error"));
        let code = error
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
            .map(str::to_string);
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(fallback_message);

        ApiError::Http {
            status,
            code,
            message,
            retry_after,
        }
    }

    /// Returns the HTTP status code if one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Classified(c) => c.http_status,
            _ => None,
        }
    }

    /// Returns true if the dependency reported throttling.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ApiError::Classified(c) => c.kind == ErrorKind::RateLimited,
            _ => self.status() == Some(429),
        }
    }

    /// Returns the retry delay hint if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Http { retry_after, .. } => *retry_after,
            ApiError::Classified(c) => c.retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::http(status.as_u16(), err.to_string())
        } else if err.is_connect() || err.is_request() {
            ApiError::Network(err.to_string())
        } else {
            ApiError::Other(err.to_string())
        }
    }
}

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimited,
    ServiceUnavailable,
    ClientError,
    Network,
    Unknown,
}

/// Stable error code surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ServerError,
    ServiceUnavailable,
    InsufficientPrivileges,
    InvalidToken,
    Throttled,
    NotFound,
    InvalidRequest,
    Conflict,
    CircuitOpen,
    NetworkError,
    Timeout,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ServerError => "server_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::InsufficientPrivileges => "insufficient_privileges",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::Throttled => "throttled",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Conflict => "conflict",
            ErrorCode::CircuitOpen => "circuit_open",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Unknown => "unknown",
        }
    }

    /// Human-readable title used as the `error` field of payloads.
    pub fn title(&self) -> &'static str {
        match self {
            ErrorCode::ServerError => "Server Error",
            ErrorCode::ServiceUnavailable => "Service Unavailable",
            ErrorCode::InsufficientPrivileges => "Insufficient Privileges",
            ErrorCode::InvalidToken => "Authentication Failed",
            ErrorCode::Throttled => "Rate Limited",
            ErrorCode::NotFound => "Not Found",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::Conflict => "Conflict",
            ErrorCode::CircuitOpen => "Service Temporarily Disabled",
            ErrorCode::NetworkError => "Network Error",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::Unknown => "Unknown Error",
        }
    }

    /// Position in the aggregation ranking; lower is more severe.
    pub(crate) fn severity_rank(&self) -> usize {
        match self {
            ErrorCode::ServerError => 0,
            ErrorCode::ServiceUnavailable => 1,
            ErrorCode::InsufficientPrivileges => 2,
            ErrorCode::InvalidToken => 3,
            ErrorCode::Throttled => 4,
            ErrorCode::NotFound => 5,
            ErrorCode::InvalidRequest => 6,
            _ => 7,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform internal failure representation.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub http_status: Option<u16>,
    pub is_retryable: bool,
    #[serde(rename = "retry_after_ms", serialize_with = "serialize_opt_millis")]
    pub retry_after: Option<Duration>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn serialize_opt_millis<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            http_status: None,
            is_retryable: false,
            retry_after: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.is_retryable = retryable;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Builds the user-facing payload.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.code.title().to_string(),
            message: self.message.clone(),
            code: self.code.as_str().to_string(),
            retryable: self.is_retryable,
            details: self.details.clone(),
        }
    }
}

/// User-facing error payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub message: String,
    pub code: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&ClassifiedError> for ErrorPayload {
    fn from(err: &ClassifiedError) -> Self {
        err.to_payload()
    }
}
