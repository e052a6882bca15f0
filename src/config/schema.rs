//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the resilience core.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for one protected resource.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Name of the protected resource (used in logs and metrics).
    pub resource: ResourceConfig,

    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry orchestrator settings.
    pub retry: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Identity of the protected dependency.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Resource identifier for logging/metrics.
    pub name: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            name: "graph".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests per window per endpoint key.
    pub max_requests: u32,

    /// Sliding window length in milliseconds.
    pub window_ms: u64,

    /// Maximum operations dispatched concurrently.
    pub max_concurrent: usize,

    /// Minimum spacing between dispatches in milliseconds.
    pub min_time_ms: u64,

    /// Retries after a caught failure inside the limiter.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10_000,
            window_ms: 600_000,
            max_concurrent: 10,
            min_time_ms: 100,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn min_time(&self) -> Duration {
        Duration::from_millis(self.min_time_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures (in Closed) before the circuit opens.
    pub failure_threshold: u32,

    /// Consecutive Half-Open successes before the circuit closes.
    pub success_threshold: u32,

    /// How long the circuit stays open before a probe, in milliseconds.
    pub timeout_ms: u64,

    /// Quiet period after which Closed-state failures are forgotten, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Minimum number of calls before the circuit may open.
    pub volume_threshold: Option<u64>,

    /// Error rate (0-100) that opens the circuit.
    pub error_threshold_percentage: f64,

    /// Age limit of outcomes in the error-rate window, in milliseconds.
    pub rolling_window_ms: u64,

    /// Maximum outcomes kept in the error-rate window.
    pub rolling_window_capacity: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            reset_timeout_ms: 300_000,
            volume_threshold: None,
            error_threshold_percentage: 50.0,
            rolling_window_ms: 60_000,
            rolling_window_capacity: 100,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base retry delay in milliseconds.
    pub retry_delay_ms: u64,

    /// Grow the delay exponentially with each attempt.
    pub exponential_backoff: bool,

    /// Upper bound for any computed delay in milliseconds.
    pub max_delay_ms: u64,

    /// Log every classified failure.
    pub log_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            exponential_backoff: true,
            max_delay_ms: 60_000,
            log_errors: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
