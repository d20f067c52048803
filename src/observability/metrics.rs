//! Metrics collection and exposition.
//!
//! # Metrics
//! - `host_invocations_total` (counter): invocations by status
//! - `host_invocation_duration_seconds` (histogram): latency distribution
//! - `host_fatal_conditions_total` (counter): fatal conditions by name
//! - `host_handler_failures_total` (counter): custom handlers that failed
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality (status code, condition name)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::lifecycle::Condition;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_invocation(status: u16, start: Instant) {
    metrics::counter!("host_invocations_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("host_invocation_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_condition(condition: Condition) {
    metrics::counter!("host_fatal_conditions_total", "condition" => condition.name()).increment(1);
}

pub fn record_handler_failures(condition: Condition, count: u64) {
    metrics::counter!("host_handler_failures_total", "condition" => condition.name()).increment(count);
}
