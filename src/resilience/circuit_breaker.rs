//! Circuit breaker for the protected dependency.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast (or go to a fallback)
//! - Half-Open: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= failure_threshold, or error rate >= threshold,
//!                gated by volume_threshold when configured
//! Open → Half-Open: first call after next_attempt (= opened + timeout)
//! Half-Open → Closed: success_threshold consecutive probe successes
//! Half-Open → Open: any probe failure (next_attempt recomputed)
//! ```
//!
//! # Design Decisions
//! - One breaker per protected resource
//! - Single probe in flight while Half-Open
//! - Client errors (4xx, auth) are answers from a live dependency and count as successes
//! - Counters live behind one mutex that is never held across an await

pub mod error_rate;

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::errors::{classify, ApiError, ErrorKind};
use crate::observability::metrics;

use self::error_rate::ErrorRateWindow;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub total_requests: u64,
    /// Failure percentage over the sliding window.
    pub failure_rate: f64,
    pub last_failure_ms_ago: Option<u64>,
    pub last_success_ms_ago: Option<u64>,
    pub next_attempt_in_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    total_requests: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
    outcomes: ErrorRateWindow,
}

impl BreakerState {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            total_requests: 0,
            last_failure: None,
            last_success: None,
            next_attempt: None,
            probe_in_flight: false,
            outcomes: ErrorRateWindow::new(config.rolling_window_capacity, config.rolling_window()),
        }
    }

    fn reset_counters(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.total_requests = 0;
        self.next_attempt = None;
        self.probe_in_flight = false;
        self.outcomes.clear();
    }
}

/// How a call got past the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Call,
    Probe,
}

/// Clears the probe slot if a probe is dropped before it reports an outcome.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    decay_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerState::new(&config)),
            config,
            decay_task: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `operation` if the breaker admits it.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let admission = self.admit()?;
        self.run(admission, operation).await
    }

    /// Like [`execute`](Self::execute), but a rejected call is handed to `fallback`.
    pub async fn execute_with_fallback<T, F, Fut, FB, FbFut>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        FB: FnOnce(ApiError) -> FbFut,
        FbFut: Future<Output = Result<T, ApiError>>,
    {
        match self.admit() {
            Ok(admission) => self.run(admission, operation).await,
            Err(rejected) => {
                tracing::debug!(circuit = %self.name, "Circuit open, using fallback");
                fallback(rejected).await
            }
        }
    }

    fn admit(&self) -> Result<Admission, ApiError> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(Admission::Call),
            CircuitState::Open => {
                let next_attempt = inner.next_attempt.unwrap_or(now);
                if now >= next_attempt {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    Err(self.rejection(next_attempt - now))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.rejection(Duration::ZERO))
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn rejection(&self, retry_in: Duration) -> ApiError {
        ApiError::CircuitOpen {
            resource: self.name.clone(),
            retry_in,
        }
    }

    async fn run<T, F, Fut>(&self, admission: Admission, operation: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Err(err) if counts_as_failure(err) => self.record_failure(admission),
            _ => self.record_success(admission),
        }
        result
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.last_success = Some(now);

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failures = inner.failures.saturating_sub(1);
                inner.total_requests += 1;
                inner.outcomes.record(now, false);
            }
            (CircuitState::HalfOpen, Admission::Probe) => {
                inner.probe_in_flight = false;
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.reset_counters();
                }
            }
            // Result of a call admitted before the state changed.
            _ => {}
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.last_failure = Some(now);

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failures += 1;
                inner.total_requests += 1;
                inner.outcomes.record(now, true);

                if self.should_open(&mut inner, now) {
                    self.open(&mut inner, now);
                }
            }
            (CircuitState::HalfOpen, Admission::Probe) => {
                inner.probe_in_flight = false;
                self.open(&mut inner, now);
            }
            _ => {}
        }
    }

    fn should_open(&self, inner: &mut BreakerState, now: Instant) -> bool {
        match self.config.volume_threshold {
            Some(volume) => {
                let rate = inner.outcomes.failure_rate(now);
                inner.total_requests >= volume
                    && (inner.failures >= self.config.failure_threshold
                        || rate >= self.config.error_threshold_percentage)
            }
            None => inner.failures >= self.config.failure_threshold,
        }
    }

    fn open(&self, inner: &mut BreakerState, now: Instant) {
        self.transition(inner, CircuitState::Open);
        inner.successes = 0;
        inner.probe_in_flight = false;
        inner.next_attempt = Some(now + self.config.timeout());
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                circuit = %self.name,
                from = %from,
                failures = inner.failures,
                timeout_ms = self.config.timeout_ms,
                "Circuit opened"
            ),
            _ => tracing::info!(
                circuit = %self.name,
                from = %from,
                to = %to,
                "Circuit state changed"
            ),
        }
        metrics::record_circuit_transition(&self.name, to.as_str(), to.gauge_value());
    }

    /// Forget Closed-state failures once `reset_timeout` passed without a new one.
    pub fn decay_failures(&self) -> bool {
        let mut inner = self.lock();
        let stale = inner.state == CircuitState::Closed
            && inner.failures > 0
            && inner
                .last_failure
                .map_or(true, |at| at.elapsed() >= self.config.reset_timeout());
        if stale {
            tracing::debug!(
                circuit = %self.name,
                failures = inner.failures,
                "Decaying stale failures"
            );
            inner.failures = 0;
        }
        stale
    }

    /// Spawn the decay timer. Replaces any running one.
    pub fn start_decay_timer(self: &Arc<Self>) {
        let breaker: Weak<Self> = Arc::downgrade(self);
        let period = (self.config.reset_timeout() / 2).max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match breaker.upgrade() {
                    Some(breaker) => {
                        breaker.decay_failures();
                    }
                    None => break,
                }
            }
        });

        let mut slot = self.decay_task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the decay timer.
    pub fn dispose(&self) {
        let mut slot = self.decay_task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        let now = Instant::now();
        let ms_ago = |at: Option<Instant>| {
            at.map(|t| now.saturating_duration_since(t).as_millis() as u64)
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            total_requests: inner.total_requests,
            failure_rate: inner.outcomes.failure_rate(now),
            last_failure_ms_ago: ms_ago(inner.last_failure),
            last_success_ms_ago: ms_ago(inner.last_success),
            next_attempt_in_ms: inner
                .next_attempt
                .filter(|_| inner.state == CircuitState::Open)
                .map(|t| t.saturating_duration_since(now).as_millis() as u64),
        }
    }

    /// Open the circuit now; it probes again after `timeout`.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.open(&mut inner, now);
    }

    /// Close the circuit and clear its counters.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.reset_counters();
    }

    /// Back to the initial state, history included.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.reset_counters();
        inner.last_failure = None;
        inner.last_success = None;
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn counts_as_failure(err: &ApiError) -> bool {
    match err {
        ApiError::CircuitOpen { .. } => false,
        other => !matches!(
            classify::classify(other).kind,
            ErrorKind::ClientError | ErrorKind::Auth
        ),
    }
}
