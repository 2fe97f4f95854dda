//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, blocks, cache, supervisor)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `guardian_requests_total` (counter): requests by service, status
//! - `guardian_request_duration_seconds` (histogram): latency by service
//! - `guardian_blocked_total` (counter): rejected requests by reason
//! - `guardian_rate_limited_total` (counter)
//! - `guardian_cache_total` (counter): hits and misses
//! - `guardian_upstream_retries_total` (counter): retries by service
//! - `guardian_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `guardian_service_restarts_total` (counter)
//! - `guardian_service_cpu_percent`, `guardian_service_memory_bytes` (gauges)
//! - `guardian_service_healthy` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed
//! - Labels are service names and reasons only, never IPs or paths

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, status: u16, elapsed: Duration) {
    counter!(
        "guardian_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("guardian_request_duration_seconds", "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_blocked(reason: &'static str) {
    counter!("guardian_blocked_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited() {
    counter!("guardian_rate_limited_total").increment(1);
}

pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("guardian_cache_total", "result" => result).increment(1);
}

pub fn record_retry(service: &str) {
    counter!("guardian_upstream_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_circuit_state(service: &str, state: f64) {
    gauge!("guardian_circuit_state", "service" => service.to_string()).set(state);
}

pub fn record_restart(service: &str) {
    counter!("guardian_service_restarts_total", "service" => service.to_string()).increment(1);
}

pub fn record_resources(service: &str, cpu_percent: f32, memory_bytes: u64) {
    gauge!("guardian_service_cpu_percent", "service" => service.to_string()).set(cpu_percent as f64);
    gauge!("guardian_service_memory_bytes", "service" => service.to_string()).set(memory_bytes as f64);
}

pub fn record_service_health(service: &str, healthy: bool) {
    gauge!("guardian_service_healthy", "service" => service.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
