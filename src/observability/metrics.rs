//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define engine metrics (requests, errors, lease decisions, traffic)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `was_requests_total` (counter): request cycles started, by role
//! - `was_errors_total` (counter): fatal and body errors, by role and kind
//! - `was_lease_released_total` (counter): lease releases, by reuse decision
//! - `was_stop_total` (counter): `STOP` packets sent, by role
//! - `was_body_bytes_total` (counter): body bytes, by direction
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Which end of the protocol a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(role: Role) {
    metrics::counter!("was_requests_total", "role" => role.as_str()).increment(1);
}

pub fn record_error(role: Role, kind: &'static str) {
    metrics::counter!("was_errors_total", "role" => role.as_str(), "kind" => kind).increment(1);
}

pub fn record_lease_released(reuse: bool) {
    let reuse = if reuse { "true" } else { "false" };
    metrics::counter!("was_lease_released_total", "reuse" => reuse).increment(1);
}

pub fn record_stop(role: Role) {
    metrics::counter!("was_stop_total", "role" => role.as_str()).increment(1);
}

pub fn record_body_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("was_body_bytes_total", "direction" => direction).increment(bytes);
}
