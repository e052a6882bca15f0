//! Quota status reported by the dependency.
//!
//! # Responsibilities
//! - Parse quota headers (remaining, limit, reset, retry-after)
//! - Hold the most recent global status
//!
//! # Recognized headers (case-insensitive)
//! - `x-ratelimit-remaining` / `ratelimit-remaining`
//! - `x-ratelimit-limit` / `ratelimit-limit`
//! - `x-ratelimit-reset` / `ratelimit-reset` (epoch seconds)
//! - `retry-after` (delta seconds or HTTP-date)

use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

const REMAINING_HEADERS: &[&str] = &["x-ratelimit-remaining", "ratelimit-remaining"];
const LIMIT_HEADERS: &[&str] = &["x-ratelimit-limit", "ratelimit-limit"];
const RESET_HEADERS: &[&str] = &["x-ratelimit-reset", "ratelimit-reset"];

/// Longest wait a response header can impose.
pub const MAX_HEADER_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Global quota state derived from the latest response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRateLimitStatus {
    pub remaining: u64,
    pub limit: u64,
    pub reset: Instant,
    pub retry_after: Option<Duration>,
}

impl GlobalRateLimitStatus {
    /// True while the reported quota is used up and has not reset yet.
    pub fn is_exhausted(&self, now: Instant) -> bool {
        self.remaining == 0 && now < self.reset
    }

    pub fn time_until_reset(&self, now: Instant) -> Duration {
        self.reset.saturating_duration_since(now)
    }

    pub fn snapshot(&self, now: Instant) -> RateLimitStatusSnapshot {
        RateLimitStatusSnapshot {
            remaining: self.remaining,
            limit: self.limit,
            reset_in_ms: self.time_until_reset(now).as_millis() as u64,
            retry_after_ms: self.retry_after.map(|d| d.as_millis() as u64),
        }
    }
}

/// Serializable view of the global status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatusSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset_in_ms: u64,
    pub retry_after_ms: Option<u64>,
}

/// Raw quota values read from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    /// Time until the quota resets.
    pub reset_in: Option<Duration>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        let now = SystemTime::now();
        Self {
            remaining: first_number(headers, REMAINING_HEADERS),
            limit: first_number(headers, LIMIT_HEADERS),
            reset_in: first_number(headers, RESET_HEADERS)
                .and_then(|epoch| until_epoch(epoch, now)),
            retry_after: header_str(headers, "retry-after").and_then(|v| parse_retry_after(v, now)),
        }
    }

    /// Build a new global status, or `None` if these headers carry no usable quota signal.
    ///
    /// A reported limit of zero is treated as "no information".
    pub fn to_status(
        &self,
        now: Instant,
        previous: Option<&GlobalRateLimitStatus>,
        default_reset: Duration,
    ) -> Option<GlobalRateLimitStatus> {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => Some(GlobalRateLimitStatus {
                remaining,
                limit,
                reset: deadline(now, self.reset_in.or(self.retry_after).unwrap_or(default_reset)),
                retry_after: self.retry_after,
            }),
            _ => self.retry_after.map(|retry_after| GlobalRateLimitStatus {
                remaining: 0,
                limit: previous.map(|p| p.limit).unwrap_or_default(),
                reset: deadline(now, retry_after),
                retry_after: Some(retry_after),
            }),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn first_number(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names
        .iter()
        .find_map(|name| header_str(headers, name).and_then(|v| v.parse::<u64>().ok()))
}

/// `None` when the epoch is not representable.
fn until_epoch(epoch_secs: u64, now: SystemTime) -> Option<Duration> {
    let at = UNIX_EPOCH.checked_add(Duration::from_secs(epoch_secs))?;
    Some(at.duration_since(now).unwrap_or_default().min(MAX_HEADER_WAIT))
}

/// `now + wait`, with `wait` capped at [`MAX_HEADER_WAIT`].
pub fn deadline(now: Instant, wait: Duration) -> Instant {
    let wait = wait.min(MAX_HEADER_WAIT);
    now.checked_add(wait).unwrap_or(now)
}

/// Parse a `retry-after` value given as delta seconds or as an HTTP-date.
///
/// Values beyond [`MAX_HEADER_WAIT`] are capped.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        return Duration::try_from_secs_f64(secs.min(MAX_HEADER_WAIT.as_secs_f64())).ok();
    }
    httpdate::parse_http_date(value)
        .ok()
        .map(|at| at.duration_since(now).unwrap_or_default().min(MAX_HEADER_WAIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_retry_after_seconds_and_date() {
        let now = SystemTime::now();
        assert_eq!(parse_retry_after("2", now), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after("0.5", now), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("-1", now), None);
        assert_eq!(parse_retry_after("soon", now), None);

        let later = now + Duration::from_secs(120);
        let date = httpdate::fmt_http_date(later);
        let parsed = parse_retry_after(&date, now).unwrap();
        assert!(parsed <= Duration::from_secs(120) && parsed >= Duration::from_secs(118));

        let past = httpdate::fmt_http_date(now - Duration::from_secs(60));
        assert_eq!(parse_retry_after(&past, now), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_headers_case_insensitive() {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_bytes(b"X-RateLimit-Remaining").unwrap(),
            HeaderValue::from_static("42"),
        );
        map.insert(
            HeaderName::from_bytes(b"RateLimit-Limit").unwrap(),
            HeaderValue::from_static("100"),
        );

        let parsed = RateLimitHeaders::parse(&map);
        assert_eq!(parsed.remaining, Some(42));
        assert_eq!(parsed.limit, Some(100));
        assert_eq!(parsed.reset_in, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_is_ignored() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-limit", "0"),
        ]));
        assert!(parsed.to_status(Instant::now(), None, Duration::from_secs(60)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_from_reset_epoch() {
        let reset_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 30;
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-limit", "100"),
            ("x-ratelimit-reset", &reset_epoch.to_string()),
        ]));

        let now = Instant::now();
        let status = parsed.to_status(now, None, Duration::from_secs(600)).unwrap();
        assert!(status.is_exhausted(now));
        assert!(status.time_until_reset(now) <= Duration::from_secs(30));
        assert!(status.time_until_reset(now) >= Duration::from_secs(28));
        assert!(!status.is_exhausted(now + Duration::from_secs(31)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_alone_marks_exhausted() {
        let previous = GlobalRateLimitStatus {
            remaining: 5,
            limit: 100,
            reset: Instant::now(),
            retry_after: None,
        };
        let parsed = RateLimitHeaders::parse(&headers(&[("retry-after", "3")]));

        let now = Instant::now();
        let status = parsed.to_status(now, Some(&previous), Duration::from_secs(600)).unwrap();
        assert_eq!(status.remaining, 0);
        assert_eq!(status.limit, 100);
        assert_eq!(status.reset, now + Duration::from_secs(3));
        assert_eq!(status.snapshot(now).retry_after_ms, Some(3000));
    }

    #[test]
    fn test_oversized_retry_after_is_capped() {
        let now = SystemTime::now();
        assert_eq!(parse_retry_after("1e30", now), Some(MAX_HEADER_WAIT));
        assert_eq!(parse_retry_after("10000000000000000000", now), Some(MAX_HEADER_WAIT));
        assert_eq!(parse_retry_after("inf", now), None);
        assert_eq!(parse_retry_after("NaN", now), None);
    }

    #[test]
    fn test_unrepresentable_reset_epoch_is_ignored() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-limit", "100"),
            ("x-ratelimit-reset", "18446744073709551615"),
        ]));
        assert_eq!(parsed.reset_in, None);
        assert_eq!(parsed.limit, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_header_yields_capped_reset() {
        let parsed = RateLimitHeaders::parse(&headers(&[("retry-after", "10000000000000000000")]));

        let now = Instant::now();
        let status = parsed.to_status(now, None, Duration::from_secs(600)).unwrap();
        assert_eq!(status.reset, now + MAX_HEADER_WAIT);
        assert!(status.is_exhausted(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_caps_wait() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::MAX), now + MAX_HEADER_WAIT);
        assert_eq!(deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }
}
