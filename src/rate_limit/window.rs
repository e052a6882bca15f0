//! Per-endpoint sliding windows.
//!
//! # Design Decisions
//! - A window resets relative to its own start, not a calendar boundary
//! - Increment-then-compare runs under the DashMap shard lock, so concurrent
//!   callers sharing a key never lose increments
//! - Eviction removes only entries untouched for two full windows

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Request counter for one endpoint key.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

impl RateLimitWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// Reset if the window has elapsed, then admit if below `max_requests`.
    fn try_acquire(&mut self, now: Instant, max_requests: u32, window: Duration) -> bool {
        self.last_seen = now;

        if now.saturating_duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }

        if self.count >= max_requests {
            false
        } else {
            self.count += 1;
            true
        }
    }

    fn remaining(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Window map shared by every caller of one limiter.
#[derive(Debug)]
pub struct WindowStore {
    windows: DashMap<String, RateLimitWindow>,
    max_requests: u32,
    window: Duration,
}

impl WindowStore {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Count one call against `key`. Returns false if the window is full.
    pub fn try_acquire(&self, key: &str, now: Instant) -> bool {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow::new(now));
        entry.try_acquire(now, self.max_requests, self.window)
    }

    /// Time left before the window for `key` resets. Zero for unseen keys.
    pub fn time_until_reset(&self, key: &str, now: Instant) -> Duration {
        self.windows
            .get(key)
            .map(|w| w.remaining(now, self.window))
            .unwrap_or_default()
    }

    /// Calls counted in the current window for `key`.
    pub fn count(&self, key: &str) -> Option<u32> {
        self.windows.get(key).map(|w| w.count())
    }

    /// Drop windows untouched for more than two window lengths.
    pub fn sweep(&self, now: Instant) -> usize {
        let stale_after = self.window.saturating_mul(2);
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.last_seen) <= stale_after);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
