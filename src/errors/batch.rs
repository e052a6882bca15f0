//! Partial-failure handling for batch calls.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::errors::classify::process_error;
use crate::errors::{ApiError, ClassifiedError, ErrorCode, ErrorKind};
use crate::rate_limit::status::parse_retry_after;

/// An operation that was sent as part of a batch request.
pub trait BatchItem {
    /// Identifier the batch response uses to refer to this operation.
    fn batch_id(&self) -> &str;
}

impl BatchItem for String {
    fn batch_id(&self) -> &str {
        self
    }
}

/// One item-level response of a batch call.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Explicit retry hint; takes precedence over a `Retry-After` item header.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl BatchItemResponse {
    pub fn new(id: impl Into<String>, status: u16, body: Option<serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            status,
            body,
            headers: HashMap::new(),
            retry_after: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Retry hint for this item, from `retry_after` or a `Retry-After` item header.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_after.or_else(|| {
            self.headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
                .and_then(|(_, value)| parse_retry_after(value, SystemTime::now()))
        })
    }

    fn to_api_error(&self) -> ApiError {
        ApiError::from_error_body(
            self.status,
            self.body.as_ref(),
            self.retry_hint(),
            || format!("Batch item {} failed with status {}", self.id, self.status),
        )
    }
}

/// Result of partitioning a batch response.
#[derive(Debug)]
pub struct BatchOutcome<O> {
    pub successful: Vec<(O, BatchItemResponse)>,
    pub failed: Vec<(O, ClassifiedError)>,
}

impl<O> BatchOutcome<O> {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Partition item-level responses into successes and classified failures.
///
/// Operations keep their original order. An operation with no matching
/// response counts as failed.
pub fn handle_batch_errors<O: BatchItem>(
    responses: Vec<BatchItemResponse>,
    operations: Vec<O>,
) -> BatchOutcome<O> {
    let mut by_id: HashMap<String, BatchItemResponse> =
        responses.into_iter().map(|r| (r.id.clone(), r)).collect();

    let mut outcome = BatchOutcome {
        successful: Vec::new(),
        failed: Vec::new(),
    };

    for op in operations {
        match by_id.remove(op.batch_id()) {
            Some(response) if response.is_success() => outcome.successful.push((op, response)),
            Some(response) => {
                let context = format!("batch item {}", response.id);
                let err = process_error(&response.to_api_error(), &context);
                outcome.failed.push((op, err));
            }
            None => {
                let err = ClassifiedError::new(
                    ErrorKind::Unknown,
                    ErrorCode::Unknown,
                    format!("No response for batch item {}", op.batch_id()),
                )
                .with_status(500);
                outcome.failed.push((op, err));
            }
        }
    }

    if outcome.has_failures() {
        tracing::warn!(
            succeeded = outcome.successful.len(),
            failed = outcome.failed.len(),
            "Batch completed with partial failures"
        );
    }

    outcome
}

/// Collapse several errors into the most severe one.
///
/// Returns `None` for an empty input. Every original is kept in the
/// aggregate's `details.errors`.
pub fn aggregate_errors(errors: &[ClassifiedError]) -> Option<ClassifiedError> {
    let primary = errors.iter().min_by_key(|e| e.code.severity_rank())?;

    if errors.len() == 1 {
        return Some(primary.clone());
    }

    let originals: Vec<_> = errors
        .iter()
        .map(|e| serde_json::to_value(e.to_payload()).unwrap_or_default())
        .collect();

    let mut aggregate = primary.clone();
    aggregate.message = format!(
        "{} errors occurred; most severe: {}",
        errors.len(),
        primary.message
    );
    aggregate.details = Some(serde_json::json!({ "errors": originals }));
    Some(aggregate)
}
