//! Sliding error-rate window.
//!
//! Each outcome carries its own timestamp; outcomes older than `max_age` are
//! pruned before the rate is computed, and at most `capacity` are kept.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ErrorRateWindow {
    outcomes: VecDeque<(Instant, bool)>,
    capacity: usize,
    max_age: Duration,
}

impl ErrorRateWindow {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            max_age,
        }
    }

    /// Record one call outcome.
    pub fn record(&mut self, now: Instant, failed: bool) {
        self.prune(now);
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back((now, failed));
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.outcomes.front() {
            if now.saturating_duration_since(*at) > self.max_age {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Failure percentage (0-100) over the live outcomes; 0 when empty.
    pub fn failure_rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|(_, failed)| *failed).count();
        failures as f64 * 100.0 / self.outcomes.len() as f64
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}
