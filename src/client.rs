//! HTTP client that routes every request through a [`ResilienceCore`].
//!
//! Response headers feed the limiter's global quota status; non-success
//! statuses become [`ApiError::Http`] so the layers above can classify them.

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::SystemTime;

use crate::errors::{ApiError, ClassifiedError};
use crate::rate_limit::status::parse_retry_after;
use crate::resilience::ResilienceCore;

/// A successful response, body read to the end.
#[derive(Debug, Clone)]
pub struct GuardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Clone)]
pub struct GuardedClient {
    http: Client,
    core: Arc<ResilienceCore>,
}

impl GuardedClient {
    pub fn new(core: Arc<ResilienceCore>) -> Self {
        Self::with_client(Client::new(), core)
    }

    pub fn with_client(http: Client, core: Arc<ResilienceCore>) -> Self {
        Self { http, core }
    }

    pub fn core(&self) -> &Arc<ResilienceCore> {
        &self.core
    }

    /// GET `url` with rate limiting, circuit breaking and retries.
    pub async fn get(
        &self,
        context: &str,
        endpoint_key: &str,
        url: &str,
    ) -> Result<GuardedResponse, ClassifiedError> {
        self.core
            .execute(context, endpoint_key, || self.send_once(url))
            .await
    }

    async fn send_once(&self, url: &str) -> Result<GuardedResponse, ApiError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        self.core.limiter().update_rate_limit_status(&headers);

        let body = response.text().await?;
        if status.is_success() {
            return Ok(GuardedResponse {
                status,
                headers,
                body,
            });
        }
        Err(error_from_response(status, &headers, &body))
    }
}

/// Turn a non-success response into a raw error.
pub fn error_from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    let retry_after = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, SystemTime::now()));
    let json = serde_json::from_str::<serde_json::Value>(body).ok();

    ApiError::from_error_body(status.as_u16(), json.as_ref(), retry_after, || {
        let reason = status.canonical_reason().unwrap_or("Unexpected status");
        if body.is_empty() {
            reason.to_string()
        } else {
            format!("{}: {}", reason, body)
        }
    })
}
