//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_rate_limited_total` (counter): local or global quota rejections by endpoint
//! - `guard_retries_total` (counter): retries scheduled, by layer and code
//! - `guard_errors_total` (counter): classified failures by code
//! - `guard_circuit_transitions_total` (counter): breaker transitions by resource and target state
//! - `guard_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `guard_queue_depth` (gauge): operations waiting in the dispatch queue

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_rate_limited(endpoint: &str, scope: &'static str) {
    metrics::counter!(
        "guard_rate_limited_total",
        "endpoint" => endpoint.to_string(),
        "scope" => scope
    )
    .increment(1);
}

pub fn record_retry(layer: &'static str, code: &str) {
    metrics::counter!("guard_retries_total", "layer" => layer, "code" => code.to_string())
        .increment(1);
}

pub fn record_classified_error(code: &'static str) {
    metrics::counter!("guard_errors_total", "code" => code).increment(1);
}

pub fn record_circuit_transition(resource: &str, to: &'static str, gauge_value: f64) {
    metrics::counter!(
        "guard_circuit_transitions_total",
        "resource" => resource.to_string(),
        "to" => to
    )
    .increment(1);
    metrics::gauge!("guard_circuit_state", "resource" => resource.to_string()).set(gauge_value);
}

pub fn record_queue_depth(depth: usize) {
    metrics::gauge!("guard_queue_depth").set(depth as f64);
}
