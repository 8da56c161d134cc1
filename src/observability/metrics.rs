//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): gateway requests by method, status
//! - `proxy_request_duration_seconds` (histogram): gateway latency
//! - `proxy_registered_targets` (gauge): live registry entries
//! - `proxy_control_connections_total` (counter): control handshakes by outcome
//! - `proxy_control_events_total` (counter): control events by type and resolution
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Record one gateway request.
pub fn record_request(method: &str, status: u16, target: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "target" => target.to_string()
    )
    .increment(1);
    histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "target" => target.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_registered_targets(count: usize) {
    gauge!("proxy_registered_targets").set(count as f64);
}

/// Record a control handshake outcome ("accepted", "unauthorized", ...).
pub fn record_control_connection(outcome: &'static str) {
    counter!("proxy_control_connections_total", "outcome" => outcome).increment(1);
}

pub fn record_control_event(event_type: &str, resolution: &'static str) {
    counter!(
        "proxy_control_events_total",
        "type" => event_type.to_string(),
        "resolution" => resolution
    )
    .increment(1);
}
