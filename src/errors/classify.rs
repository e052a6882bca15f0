//! Failure classification.
//!
//! # Responsibilities
//! - Map raw transport/HTTP failures onto the fixed taxonomy
//! - Decide retryability per class
//! - Pick the log severity for a classified failure
//!
//! # Retryability
//! ```text
//! 401 / auth codes      → Auth            not retryable (refresh path only)
//! 429 / throttle codes  → RateLimited     retryable, carries retry-after
//! 502 / 503 / 504       → ServiceUnavailable retryable
//! other 5xx             → ServiceUnavailable (server_error) retryable
//! other 4xx             → ClientError     not retryable
//! network / timeout     → Network         retryable
//! circuit open          → ServiceUnavailable (circuit_open) not retryable
//! anything else         → Unknown, status 500, not retryable
//! ```

use crate::errors::{ApiError, ClassifiedError, ErrorCode, ErrorKind};

/// Service error codes that identify a failure independently of the status line.
fn kind_for_service_code(code: &str) -> Option<(ErrorKind, ErrorCode)> {
    match code {
        "InvalidAuthenticationToken"
        | "AuthenticationError"
        | "TokenExpired"
        | "unauthenticated" => Some((ErrorKind::Auth, ErrorCode::InvalidToken)),
        "ErrorAccessDenied" | "Authorization_RequestDenied" | "accessDenied" | "forbidden" => {
            Some((ErrorKind::ClientError, ErrorCode::InsufficientPrivileges))
        }
        "TooManyRequests"
        | "activityLimitReached"
        | "rateLimitExceeded"
        | "userRateLimitExceeded" => Some((ErrorKind::RateLimited, ErrorCode::Throttled)),
        "ServiceNotAvailable" | "serviceNotAvailable" | "backendError" => {
            Some((ErrorKind::ServiceUnavailable, ErrorCode::ServiceUnavailable))
        }
        _ => None,
    }
}

fn classify_status(status: u16) -> (ErrorKind, ErrorCode) {
    match status {
        401 => (ErrorKind::Auth, ErrorCode::InvalidToken),
        403 => (ErrorKind::ClientError, ErrorCode::InsufficientPrivileges),
        404 => (ErrorKind::ClientError, ErrorCode::NotFound),
        409 | 412 => (ErrorKind::ClientError, ErrorCode::Conflict),
        429 => (ErrorKind::RateLimited, ErrorCode::Throttled),
        502..=504 => (ErrorKind::ServiceUnavailable, ErrorCode::ServiceUnavailable),
        500..=599 => (ErrorKind::ServiceUnavailable, ErrorCode::ServerError),
        400..=499 => (ErrorKind::ClientError, ErrorCode::InvalidRequest),
        _ => (ErrorKind::Unknown, ErrorCode::Unknown),
    }
}

fn is_retryable_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::RateLimited | ErrorKind::ServiceUnavailable | ErrorKind::Network
    )
}

/// Classification without logging or metrics.
pub(crate) fn classify(raw: &ApiError) -> ClassifiedError {
    match raw {
        ApiError::Classified(existing) => existing.clone(),
        ApiError::Http {
            status,
            code,
            message,
            retry_after,
        } => {
            let (kind, error_code) = code
                .as_deref()
                .and_then(kind_for_service_code)
                .unwrap_or_else(|| classify_status(*status));
            let mut err = ClassifiedError::new(kind, error_code, message.clone())
                .with_status(*status)
                .retryable(is_retryable_kind(kind))
                .with_retry_after(*retry_after);
            if let Some(code) = code {
                err = err.with_details(serde_json::json!({ "service_code": code }));
            }
            err
        }
        ApiError::Network(message) => {
            ClassifiedError::new(ErrorKind::Network, ErrorCode::NetworkError, message.clone())
                .retryable(true)
        }
        ApiError::Timeout(message) => {
            ClassifiedError::new(ErrorKind::Network, ErrorCode::Timeout, message.clone())
                .retryable(true)
        }
        ApiError::CircuitOpen { resource, retry_in } => ClassifiedError::new(
            ErrorKind::ServiceUnavailable,
            ErrorCode::CircuitOpen,
            format!("{} is temporarily unavailable", resource),
        )
        .with_status(503)
        .with_retry_after(Some(*retry_in)),
        ApiError::Other(message) => {
            ClassifiedError::new(ErrorKind::Unknown, ErrorCode::Unknown, message.clone())
                .with_status(500)
        }
    }
}

/// True if the failure belongs to a class that may be retried with backoff.
pub(crate) fn is_transient(raw: &ApiError) -> bool {
    classify(raw).is_retryable
}

/// Map a raw failure to a [`ClassifiedError`].
///
/// Classifying an already-classified error returns it unchanged.
pub fn process_error(raw: &ApiError, context: &str) -> ClassifiedError {
    if let ApiError::Classified(existing) = raw {
        return existing.clone();
    }
    let classified = classify(raw);

    tracing::trace!(
        context = %context,
        code = %classified.code,
        status = ?classified.http_status,
        retryable = classified.is_retryable,
        "Classified failure"
    );
    crate::observability::metrics::record_classified_error(classified.code.as_str());

    classified
}

/// Log a classified failure at the severity its class calls for.
pub fn log_classified(err: &ClassifiedError, context: &str, attempt: u32, total_attempts: u32) {
    let status = err.http_status.unwrap_or_default();
    match (err.kind, err.code) {
        (_, ErrorCode::NotFound) => tracing::debug!(
            context = %context, attempt, total_attempts, code = %err.code, status,
            "{}", err.message
        ),
        (ErrorKind::Auth, _) | (ErrorKind::RateLimited, _) => tracing::warn!(
            context = %context, attempt, total_attempts, code = %err.code, status,
            "{}", err.message
        ),
        _ if status >= 500 => tracing::error!(
            context = %context, attempt, total_attempts, code = %err.code, status,
            "{}", err.message
        ),
        _ => tracing::warn!(
            context = %context, attempt, total_attempts, code = %err.code, status,
            "{}", err.message
        ),
    }
}
