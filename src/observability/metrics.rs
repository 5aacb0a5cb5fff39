//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_retries_total` (counter): attempts beyond the first
//! - `proxy_backend_marked_down_total` (counter): failures per backend
//! - `proxy_backend_health` (gauge): 1=healthy, 0=down
//! - `proxy_health_resets_total` (counter): whole-pool resets

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
        Label::new("backend", backend.to_string()),
    ];
    counter!("proxy_requests_total", labels.clone()).increment(1);
    histogram!("proxy_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_retry() {
    counter!("proxy_retries_total").increment(1);
}

pub fn record_backend_down(backend: &str) {
    counter!("proxy_backend_marked_down_total", "backend" => backend.to_string()).increment(1);
    record_backend_health(backend, false);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_health_reset() {
    counter!("proxy_health_resets_total").increment(1);
}
