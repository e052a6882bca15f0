//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! ResilienceCore::execute(context, endpoint_key, op)
//!     → retries.rs (classify, refresh credentials, back off, retry)
//!     → rate_limit (window check, dispatch queue, throttle handling)
//!     → circuit_breaker.rs (fail fast while the dependency is down)
//!     → op()
//! ```
//!
//! # Design Decisions
//! - One core per protected resource; components are built once at startup
//! - Background tasks hold weak references and stop on shutdown
//! - Every layer sees the raw error; only the outermost one classifies for callers

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::ResilienceConfig;
use crate::errors::{ApiError, ClassifiedError};
use crate::lifecycle::Shutdown;
use crate::rate_limit::{QueueStats, RateLimitStatusSnapshot, RateLimiter};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use retries::{CredentialRefresher, RetryOrchestrator};

/// Serializable snapshot of every component of a core.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceStats {
    pub resource: String,
    pub rate_limit: Option<RateLimitStatusSnapshot>,
    pub queue: QueueStats,
    pub tracked_endpoints: usize,
    pub circuit_breaker: CircuitBreakerStats,
}

/// Rate limiter, circuit breaker and retry orchestrator for one resource.
pub struct ResilienceCore {
    name: String,
    config: ResilienceConfig,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryOrchestrator,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResilienceCore {
    pub fn new(config: ResilienceConfig) -> Self {
        let name = config.resource.name.clone();
        Self {
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            breaker: Arc::new(CircuitBreaker::new(name.clone(), config.circuit_breaker.clone())),
            retry: RetryOrchestrator::new(config.retry.clone()),
            sweeper: Mutex::new(None),
            name,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryOrchestrator {
        &self.retry
    }

    /// Run `operation` through the full chain.
    pub async fn execute<T, F, Fut>(
        &self,
        context: &str,
        endpoint_key: &str,
        operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run(context, endpoint_key, &operation, None).await
    }

    /// Like [`execute`](Self::execute), refreshing credentials once on a
    /// first-attempt auth failure.
    pub async fn execute_with_refresh<T, F, Fut>(
        &self,
        context: &str,
        endpoint_key: &str,
        operation: F,
        refresher: &dyn CredentialRefresher,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run(context, endpoint_key, &operation, Some(refresher)).await
    }

    async fn run<T, F, Fut>(
        &self,
        context: &str,
        endpoint_key: &str,
        operation: &F,
        refresher: Option<&dyn CredentialRefresher>,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let limiter: &RateLimiter = &self.limiter;
        let breaker: &CircuitBreaker = &self.breaker;
        let limiter_retries = self.config.rate_limit.max_retries;

        self.retry
            .handle_with_retry(
                context,
                move || {
                    limiter.execute_with_rate_limit(endpoint_key, limiter_retries, move || {
                        breaker.execute(move || operation())
                    })
                },
                refresher,
            )
            .await
    }

    /// Spawn the window sweeper and the breaker decay timer.
    pub fn start(&self, shutdown: &Shutdown) {
        let handle = self.limiter.spawn_sweeper(shutdown.subscribe());
        let mut slot = self.sweeper.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        self.breaker.start_decay_timer();
        tracing::info!(resource = %self.name, "Resilience core started");
    }

    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            resource: self.name.clone(),
            rate_limit: self.limiter.status(),
            queue: self.limiter.queue_stats(),
            tracked_endpoints: self.limiter.tracked_keys(),
            circuit_breaker: self.breaker.stats(),
        }
    }

    /// Stop background tasks and reject queued work.
    pub fn shutdown(&self) {
        self.limiter.close();
        self.breaker.dispose();
        let mut slot = self.sweeper.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        tracing::info!(resource = %self.name, "Resilience core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config() -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.rate_limit.min_time_ms = 0;
        config.rate_limit.max_retries = 0;
        config.retry.retry_delay_ms = 10;
        config.circuit_breaker.failure_threshold = 3;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_through_chain() {
        let core = ResilienceCore::new(config());
        let calls = AtomicU32::new(0);

        let value = core
            .execute("users.get", "users", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::http(502, "bad gateway"))
                } else {
                    Ok("alice")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "alice");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(core.stats().circuit_breaker.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_stops_retries() {
        let core = ResilienceCore::new(config());
        core.breaker().force_open();
        let calls = AtomicU32::new(0);

        let err = core
            .execute("users.get", "users", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::CircuitOpen);
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let core = ResilienceCore::new(config());
        let shutdown = Shutdown::new();
        core.start(&shutdown);

        core.execute("users.get", "users", || async { Ok::<_, ApiError>(()) })
            .await
            .unwrap();
        assert_eq!(core.stats().tracked_endpoints, 1);

        shutdown.trigger();
        core.shutdown();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = core
            .execute("users.get", "users", || async { Ok::<_, ApiError>(()) })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unknown);
    }
}
