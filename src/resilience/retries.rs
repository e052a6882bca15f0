//! Retry orchestration.
//!
//! # Responsibilities
//! - Classify every failed attempt
//! - Refresh credentials once on a first-attempt auth failure
//! - Retry retryable failures with exponential backoff + jitter
//! - Stop on non-retryable failures, breaker rejections included
//!
//! # Design Decisions
//! - `max_retries + 1` attempts in total
//! - A throttled failure waits for the delay the dependency suggested
//! - Jitter is symmetric (±10%) and the result never exceeds `max_delay_ms`

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::errors::{classify, ApiError, ClassifiedError, ErrorKind};
use crate::observability::metrics;
use crate::resilience::backoff::{exponential_delay, symmetric_jitter};

const JITTER_RATIO: f64 = 0.1;

/// Renews whatever credential the protected call presents.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), ApiError>;
}

#[async_trait]
impl<F, Fut> CredentialRefresher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
{
    async fn refresh(&self) -> Result<(), ApiError> {
        (self)().await
    }
}

#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    config: RetryConfig,
}

impl RetryOrchestrator {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails for good, or the budget runs out.
    pub async fn handle_with_retry<T, F, Fut>(
        &self,
        context: &str,
        mut operation: F,
        on_token_refresh: Option<&dyn CredentialRefresher>,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let total_attempts = self.config.max_retries + 1;
        let mut refreshed = false;
        let mut attempt: u32 = 0;

        loop {
            let raw = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;

            let err = classify::process_error(&raw, context);
            if self.config.log_errors {
                classify::log_classified(&err, context, attempt, total_attempts);
            }

            if err.kind == ErrorKind::Auth {
                match on_token_refresh {
                    Some(refresher) if attempt == 1 && !refreshed => {
                        refreshed = true;
                        tracing::info!(
                            context = %context,
                            "Refreshing credentials after auth failure"
                        );
                        if let Err(refresh_err) = refresher.refresh().await {
                            tracing::warn!(
                                context = %context,
                                error = %refresh_err,
                                "Credential refresh failed"
                            );
                            return Err(err);
                        }
                        metrics::record_retry("orchestrator", err.code.as_str());
                        continue;
                    }
                    _ => return Err(err),
                }
            }

            if !err.is_retryable || attempt >= total_attempts {
                return Err(err);
            }

            let delay = self.delay_for(&err, attempt - 1);
            tracing::debug!(
                context = %context,
                attempt,
                total_attempts,
                delay = ?delay,
                "Retrying after failure"
            );
            metrics::record_retry("orchestrator", err.code.as_str());
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before the retry that follows zero-based `retry`.
    fn delay_for(&self, err: &ClassifiedError, retry: u32) -> Duration {
        let cap = Duration::from_millis(self.config.max_delay_ms);

        if err.kind == ErrorKind::RateLimited {
            if let Some(suggested) = err.retry_after {
                return suggested;
            }
        }

        if !self.config.exponential_backoff {
            return Duration::from_millis(self.config.retry_delay_ms).min(cap);
        }

        let delay = exponential_delay(retry, self.config.retry_delay_ms, self.config.max_delay_ms);
        symmetric_jitter(delay, JITTER_RATIO).min(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn orchestrator(max_retries: u32) -> RetryOrchestrator {
        RetryOrchestrator::new(RetryConfig {
            max_retries,
            retry_delay_ms: 100,
            exponential_backoff: true,
            max_delay_ms: 1000,
            log_errors: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = orchestrator(3)
            .handle_with_retry(
                "mail.list",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(ApiError::http(503, "unavailable"))
                    } else {
                        Ok("ok")
                    }
                },
                None,
            )
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_classified_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = orchestrator(2)
            .handle_with_retry(
                "mail.list",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Network("reset".into()))
                },
                None,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::NetworkError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_refreshes_once() {
        let calls = AtomicU32::new(0);
        let refreshes = Arc::new(AtomicU32::new(0));
        let counter = refreshes.clone();
        let refresher = move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ApiError>(())
            }
        };
        let start = Instant::now();

        let result = orchestrator(3)
            .handle_with_retry(
                "files.get",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::http(401, "token expired"))
                    } else {
                        Ok(42)
                    }
                },
                Some(&refresher),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_after_first_attempt_is_not_refreshed() {
        let calls = AtomicU32::new(0);
        let refreshes = Arc::new(AtomicU32::new(0));
        let counter = refreshes.clone();
        let refresher = move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ApiError>(())
            }
        };

        let result: Result<(), _> = orchestrator(3)
            .handle_with_retry(
                "files.get",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::http(503, "unavailable"))
                    } else {
                        Err(ApiError::http(401, "token expired"))
                    }
                },
                Some(&refresher),
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Auth);
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_auth_failure_is_returned() {
        let calls = AtomicU32::new(0);
        let refreshes = Arc::new(AtomicU32::new(0));
        let counter = refreshes.clone();
        let refresher = move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ApiError>(())
            }
        };

        let result: Result<(), _> = orchestrator(3)
            .handle_with_retry(
                "files.get",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::http(401, "revoked"))
                },
                Some(&refresher),
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Auth);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_returns_auth_error() {
        let calls = AtomicU32::new(0);
        let refresher = || async { Err::<(), _>(ApiError::Network("idp down".into())) };

        let result: Result<(), _> = orchestrator(3)
            .handle_with_retry(
                "files.get",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::http(401, "expired"))
                },
                Some(&refresher),
            )
            .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidToken);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = orchestrator(3)
            .handle_with_retry(
                "contacts.get",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::http(404, "no such contact"))
                },
                None,
            )
            .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_bypasses_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = orchestrator(3)
            .handle_with_retry(
                "calendar.list",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::CircuitOpen {
                        resource: "graph".into(),
                        retry_in: Duration::from_secs(30),
                    })
                },
                None,
            )
            .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_waits_suggested_delay() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = orchestrator(3)
            .handle_with_retry(
                "mail.send",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::throttled(Some(Duration::from_secs(7))))
                    } else {
                        Ok(())
                    }
                },
                None,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn test_delay_policy() {
        let orch = orchestrator(3);
        let server =
            ClassifiedError::new(ErrorKind::ServiceUnavailable, ErrorCode::ServerError, "boom")
                .retryable(true);

        for retry in 0..3 {
            let expected = 100.0 * 2f64.powi(retry as i32);
            let delay = orch.delay_for(&server, retry).as_millis() as f64;
            assert!(
                delay >= expected * 0.9 - 1.0 && delay <= expected * 1.1 + 1.0,
                "retry {retry}"
            );
        }
        assert!(orch.delay_for(&server, 20) <= Duration::from_millis(1000));

        let fixed = RetryOrchestrator::new(RetryConfig {
            exponential_backoff: false,
            ..orch.config().clone()
        });
        assert_eq!(fixed.delay_for(&server, 5), Duration::from_millis(100));
    }
}
