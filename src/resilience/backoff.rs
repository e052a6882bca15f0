//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential delay without jitter: `min(base · 2^attempt, max)`.
///
/// `attempt` is zero-based: the first retry waits `base`.
pub fn exponential_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Random extra time between 0 and 10% of `delay`.
pub fn additive_jitter(delay: Duration) -> Duration {
    let jitter_range = delay.as_millis() as u64 / 10;
    if jitter_range == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..jitter_range))
}

/// Calculate exponential backoff delay with jitter: `min(base · 2^attempt + jitter, max)`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay = exponential_delay(attempt, base_ms, max_ms);
    (delay + additive_jitter(delay)).min(Duration::from_millis(max_ms))
}

/// Spread `delay` uniformly by ±`ratio` of itself.
pub fn symmetric_jitter(delay: Duration, ratio: f64) -> Duration {
    let spread = delay.as_secs_f64() * ratio;
    if spread <= 0.0 {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}
