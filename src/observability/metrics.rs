//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transport_bytes_sent_total` / `transport_bytes_received_total` (counter): body bytes by direction
//! - `transport_send_duration_seconds` / `transport_receive_duration_seconds` (histogram)
//! - `presentation_connections_total` (counter): accepted connections by wrapper and `secure`
//! - `registry_services` (gauge): registered `(domain, security, path)` keys
//! - `dispatch_requests_total` (counter): serviced requests by status
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so library users opt in
//! - Labels are low-cardinality: no paths or peer addresses

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{Error, Result};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Config(format!("metrics exporter: {}", e)))?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_presentation(wrapper: &'static str, secure: bool) {
    counter!(
        "presentation_connections_total",
        "wrapper" => wrapper,
        "secure" => if secure { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_send(bytes: u64, elapsed: Duration) {
    counter!("transport_bytes_sent_total").increment(bytes);
    histogram!("transport_send_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_receive(bytes: u64, elapsed: Duration) {
    counter!("transport_bytes_received_total").increment(bytes);
    histogram!("transport_receive_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_dispatch(status: u16) {
    counter!("dispatch_requests_total", "status" => status.to_string()).increment(1);
}

pub fn set_registry_services(count: usize) {
    gauge!("registry_services").set(count as f64);
}
