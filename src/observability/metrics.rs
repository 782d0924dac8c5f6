//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatekeeper_requests_throttled_total` (counter): requests refused by the rate limiter
//! - `gatekeeper_auth_failures_total` (counter): rejected credentials, labelled by `reason`
//! - `gatekeeper_edit_conflicts_total` (counter): version-mismatched updates
//! - `gatekeeper_rate_limiter_clients` (gauge): client keys currently tracked
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub fn record_throttled() {
    metrics::counter!("gatekeeper_requests_throttled_total").increment(1);
}

/// `reason` is a fixed label such as `invalid_token` or `invalid_credentials`.
pub fn record_auth_failure(reason: &'static str) {
    metrics::counter!("gatekeeper_auth_failures_total", "reason" => reason).increment(1);
}

pub fn record_edit_conflict() {
    metrics::counter!("gatekeeper_edit_conflicts_total").increment(1);
}

pub fn set_tracked_clients(count: usize) {
    metrics::gauge!("gatekeeper_rate_limiter_clients").set(count as f64);
}

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(err) => tracing::error!(error = %err, "Failed to install metrics exporter"),
    }
}
