//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency by service
//! - `gateway_rate_limited_total` (counter): denials by endpoint
//! - `gateway_circuit_transitions_total` (counter): breaker transitions
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_retries_total` (counter): extra attempts by service
//! - `gateway_cache_total` (counter): cache hits and misses
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed
//! - Labels stay low-cardinality: no paths, no client addresses

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "service" => service.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(endpoint: &str) {
    counter!("gateway_rate_limited_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_breaker_transition(service: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "gateway_circuit_transitions_total",
        "service" => service.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);

    let level = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state", "service" => service.to_string()).set(level);
}

pub fn record_retry(service: &str) {
    counter!("gateway_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_cache_total", "result" => result).increment(1);
}

pub fn record_backend_health(address: &str, healthy: bool) {
    gauge!("gateway_backend_health", "address" => address.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
