//! GuardedClient against a local mock dependency.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use api_guard::{ErrorCode, GuardedClient, ResilienceConfig, ResilienceCore};

mod common;
use common::MockResponse;

fn client(config: ResilienceConfig) -> GuardedClient {
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();
    GuardedClient::with_client(http, Arc::new(ResilienceCore::new(config)))
}

fn fast_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.rate_limit.min_time_ms = 0;
    config.rate_limit.max_retries = 2;
    config.rate_limit.base_delay_ms = 10;
    config.rate_limit.max_delay_ms = 100;
    config.retry.max_retries = 0;
    config
}

#[tokio::test]
async fn test_recovers_from_transient_failures() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                MockResponse::status(503, "Service Unavailable")
            } else {
                MockResponse::ok("Success")
            }
        }
    })
    .await;

    let client = client(fast_config());
    let response = client
        .get("probe", "global", &format!("http://{}/", addr))
        .await
        .expect("should eventually succeed after retries");

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "Success");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_headers_update_global_status() {
    let addr = common::start_programmable_backend(|| async {
        MockResponse::ok("{}")
            .header("X-RateLimit-Remaining", "42")
            .header("X-RateLimit-Limit", "1000")
    })
    .await;

    let client = client(fast_config());
    client.get("probe", "global", &format!("http://{}/", addr)).await.unwrap();

    let status = client.core().stats().rate_limit.expect("status from headers");
    assert_eq!(status.remaining, 42);
    assert_eq!(status.limit, 1000);
}

#[tokio::test]
async fn test_throttle_honors_retry_after() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                let body = r#"{"error":{"code":"TooManyRequests","message":"slow down"}}"#;
                MockResponse::status(429, body).header("Retry-After", "1")
            } else {
                MockResponse::ok("done")
            }
        }
    })
    .await;

    let client = client(fast_config());
    let start = Instant::now();
    let response = client.get("probe", "global", &format!("http://{}/", addr)).await.unwrap();

    assert_eq!(response.body, "done");
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_not_found_is_returned_without_retry() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            let body = r#"{"error":{"code":"itemNotFound","message":"no such item"}}"#;
            MockResponse::status(404, body)
        }
    })
    .await;

    let client = client(fast_config());
    let err = client
        .get("probe", "global", &format!("http://{}/missing", addr))
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, "no such item");
    assert_eq!(err.http_status, Some(404));
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_dependency_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = fast_config();
    config.rate_limit.max_retries = 0;
    let client = client(config);
    let err = client.get("probe", "global", &format!("http://{}/", addr)).await.unwrap_err();

    assert!(err.is_retryable);
    assert_eq!(err.code, ErrorCode::NetworkError);
}
