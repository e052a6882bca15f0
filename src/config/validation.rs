//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0, percentages in range)
//! - Detect inconsistent delay bounds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.resource.name.trim().is_empty() {
        errors.push(ValidationError::new("resource.name", "must not be empty"));
    }

    let rl = &config.rate_limit;
    if rl.max_requests == 0 {
        errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
    }
    if rl.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be greater than 0"));
    }
    if rl.max_concurrent == 0 {
        errors.push(ValidationError::new("rate_limit.max_concurrent", "must be greater than 0"));
    }
    if rl.max_delay_ms < rl.base_delay_ms {
        errors.push(ValidationError::new(
            "rate_limit.max_delay_ms",
            format!("must be at least base_delay_ms ({})", rl.base_delay_ms),
        ));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.success_threshold",
            "must be greater than 0",
        ));
    }
    if cb.timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_ms", "must be greater than 0"));
    }
    if cb.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.reset_timeout_ms",
            "must be greater than 0",
        ));
    }
    if !(0.0..=100.0).contains(&cb.error_threshold_percentage) {
        errors.push(ValidationError::new(
            "circuit_breaker.error_threshold_percentage",
            "must be between 0 and 100",
        ));
    }
    if cb.rolling_window_capacity == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.rolling_window_capacity",
            "must be greater than 0",
        ));
    }

    let retry = &config.retry;
    if retry.max_delay_ms < retry.retry_delay_ms {
        errors.push(ValidationError::new(
            "retry.max_delay_ms",
            format!("must be at least retry_delay_ms ({})", retry.retry_delay_ms),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
