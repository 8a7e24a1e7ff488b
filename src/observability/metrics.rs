//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define frontend metrics (connections, handshakes, requests, TLS updates)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `frontend_connections_accepted_total` (counter): by endpoint
//! - `frontend_connection_errors_total` (counter): by reason (handshake, admission, ...)
//! - `frontend_active_connections` (gauge): current connection count
//! - `frontend_tls_handshakes_total` (counter): by kind (full, resumed)
//! - `frontend_ticket_decrypt_miss_total` (counter)
//! - `frontend_tls_snapshot_version` (gauge): by endpoint
//! - `frontend_tls_updates_total` (counter): by endpoint, reason, result
//! - `frontend_requests_total` (counter): by status
//! - `frontend_request_duration_seconds` (histogram)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels stay low-cardinality: endpoint address, reason, status code

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_connection_accepted(endpoint: &str) {
    counter!("frontend_connections_accepted_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_connection_error(reason: &'static str) {
    counter!("frontend_connection_errors_total", "reason" => reason).increment(1);
}

pub fn set_active_connections(count: u64) {
    gauge!("frontend_active_connections").set(count as f64);
}

pub fn record_handshake(resumed: bool) {
    let kind = if resumed { "resumed" } else { "full" };
    counter!("frontend_tls_handshakes_total", "kind" => kind).increment(1);
}

pub fn record_ticket_decrypt_miss() {
    counter!("frontend_ticket_decrypt_miss_total").increment(1);
}

pub fn record_tls_snapshot(endpoint: &str, version: u64, reason: &'static str) {
    gauge!("frontend_tls_snapshot_version", "endpoint" => endpoint.to_string()).set(version as f64);
    counter!(
        "frontend_tls_updates_total",
        "endpoint" => endpoint.to_string(),
        "reason" => reason,
        "result" => "published"
    )
    .increment(1);
}

pub fn record_tls_update_failure(endpoint: &str, reason: &'static str) {
    counter!(
        "frontend_tls_updates_total",
        "endpoint" => endpoint.to_string(),
        "reason" => reason,
        "result" => "failed"
    )
    .increment(1);
}

pub fn record_request(status: u16, start: Instant) {
    counter!("frontend_requests_total", "status" => status.to_string()).increment(1);
    histogram!("frontend_request_duration_seconds").record(start.elapsed().as_secs_f64());
}
