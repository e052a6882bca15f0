//! Outbound rate limiting.
//!
//! # Data Flow
//! ```text
//! execute_with_rate_limit(key, op):
//!     → check_rate_limit(key)
//!         → status.rs (global quota exhausted? reject)
//!         → window.rs (local window full? reject)
//!       rejected: sleep until the window/quota resets (+ jitter), check again
//!     → queue.rs (bounded concurrency, min spacing)
//!     → op()
//!       429: record retry-after as global status, sleep, retry
//!       other transient failure: exponential backoff, retry
//! ```
//!
//! # Design Decisions
//! - Waiting for a window does not consume the retry budget
//! - Sleeps happen outside the dispatch queue so waiting callers hold no slot
//! - The global status is swapped atomically; readers never block writers

pub mod queue;
pub mod status;
pub mod window;

use arc_swap::ArcSwapOption;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::errors::{classify, ApiError};
use crate::observability::metrics;
use crate::resilience::backoff::{additive_jitter, calculate_backoff};

pub use queue::{DispatchQueue, QueueClosed, QueueStats};
pub use status::{GlobalRateLimitStatus, RateLimitHeaders, RateLimitStatusSnapshot};
pub use window::{RateLimitWindow, WindowStore};

/// Endpoint key used when callers do not partition their traffic.
pub const GLOBAL_KEY: &str = "global";

/// Shortest wait between two window checks.
const MIN_WINDOW_WAIT: Duration = Duration::from_millis(1);

/// Sliding-window limiter with a dispatch queue.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: WindowStore,
    global: ArcSwapOption<GlobalRateLimitStatus>,
    queue: DispatchQueue,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: WindowStore::new(config.max_requests, config.window()),
            global: ArcSwapOption::empty(),
            queue: DispatchQueue::new(config.max_concurrent, config.min_time()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a call against `endpoint_key`. Returns false if it must wait.
    pub fn check_rate_limit(&self, endpoint_key: &str) -> bool {
        let now = Instant::now();

        if let Some(status) = self.global.load().as_deref() {
            if status.is_exhausted(now) {
                tracing::debug!(
                    endpoint = %endpoint_key,
                    reset_in = ?status.time_until_reset(now),
                    "Global quota exhausted"
                );
                metrics::record_rate_limited(endpoint_key, "global");
                return false;
            }
        }

        let allowed = self.windows.try_acquire(endpoint_key, now);
        if !allowed {
            tracing::debug!(
                endpoint = %endpoint_key,
                max_requests = self.config.max_requests,
                "Local rate limit window full"
            );
            metrics::record_rate_limited(endpoint_key, "window");
        }
        allowed
    }

    /// Time until `endpoint_key` may be admitted again.
    pub fn time_until_reset(&self, endpoint_key: &str) -> Duration {
        let now = Instant::now();
        let global = self
            .global
            .load()
            .as_deref()
            .filter(|s| s.is_exhausted(now))
            .map(|s| s.time_until_reset(now))
            .unwrap_or_default();
        global.max(self.windows.time_until_reset(endpoint_key, now))
    }

    /// Update the global status from response headers.
    pub fn update_rate_limit_status(&self, headers: &HeaderMap) {
        let parsed = RateLimitHeaders::parse(headers);
        let previous = self.global.load_full();
        let status = parsed.to_status(Instant::now(), previous.as_deref(), self.config.window());
        if let Some(status) = status {
            tracing::trace!(
                remaining = status.remaining,
                limit = status.limit,
                "Rate limit status updated"
            );
            self.global.store(Some(Arc::new(status)));
        }
    }

    /// Record a throttling response: no quota left until `retry_after` passes.
    pub fn record_retry_after(&self, retry_after: Duration) {
        let previous = self.global.load_full();
        let status = GlobalRateLimitStatus {
            remaining: 0,
            limit: previous.as_deref().map(|p| p.limit).unwrap_or_default(),
            reset: status::deadline(Instant::now(), retry_after),
            retry_after: Some(retry_after),
        };
        self.global.store(Some(Arc::new(status)));
    }

    /// Current global status, if the dependency has reported one.
    pub fn status(&self) -> Option<RateLimitStatusSnapshot> {
        self.global
            .load()
            .as_deref()
            .map(|s| s.snapshot(Instant::now()))
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    /// Stop admitting work through the dispatch queue.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Number of endpoint keys with a live window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Run `operation` through the window check, the dispatch queue and the retry policy.
    pub async fn execute_with_rate_limit<T, F, Fut>(
        &self,
        endpoint_key: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            while !self.check_rate_limit(endpoint_key) {
                let wait = self.time_until_reset(endpoint_key).max(MIN_WINDOW_WAIT);
                let wait = wait + additive_jitter(wait);
                tracing::debug!(
                    endpoint = %endpoint_key,
                    wait = ?wait,
                    "Waiting for rate limit window"
                );
                tokio::time::sleep(wait).await;
            }

            let err = match self.queue.schedule(operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(closed) => return Err(ApiError::Other(closed.to_string())),
            };

            if attempt >= max_retries {
                return Err(err);
            }

            let delay = if err.is_rate_limited() {
                let delay = err.retry_after().unwrap_or_else(|| {
                    calculate_backoff(attempt, self.config.base_delay_ms, self.config.max_delay_ms)
                });
                self.record_retry_after(delay);
                delay
            } else if classify::is_transient(&err) {
                calculate_backoff(attempt, self.config.base_delay_ms, self.config.max_delay_ms)
            } else {
                return Err(err);
            };

            attempt += 1;
            tracing::warn!(
                endpoint = %endpoint_key,
                attempt,
                max_retries,
                delay = ?delay,
                error = %err,
                "Retrying rate-limited call"
            );
            metrics::record_retry("rate_limiter", classify::classify(&err).code.as_str());
            tokio::time::sleep(delay).await;
        }
    }

    /// Drop windows untouched for two window lengths.
    pub fn sweep_stale_windows(&self) -> usize {
        let removed = self.windows.sweep(Instant::now());
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.windows.len(),
                "Swept stale rate limit windows"
            );
        }
        removed
    }

    /// Spawn the periodic sweep. The task ends on shutdown or when the limiter is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.config.window();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match limiter.upgrade() {
                            Some(limiter) => {
                                limiter.sweep_stale_windows();
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limit sweeper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}
