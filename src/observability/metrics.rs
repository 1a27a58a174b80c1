//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, tunnels, throttling)
//! - Expose Prometheus-compatible metrics endpoint
//! - Bridge throttle events into logs and metrics (`MetricsObserver`)
//!
//! # Metrics
//! - `proxy_requests_total` (counter): forwarded HTTP requests by method, status
//! - `proxy_request_duration_seconds` (histogram): forwarding latency
//! - `ws_tunnels_active` (gauge): open WebSocket tunnels
//! - `ws_tunnels_total` (counter): tunnels opened since start
//! - `ws_bytes_total` (counter): bytes moved by direction
//! - `ws_throttle_wait_seconds` (histogram): time spent waiting for tokens
//! - `ws_throttle_errors_total` (counter): aborted waits by direction, kind
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels limited to method, status, direction and error kind

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::throttle::{Direction, ThrottleObserver, WaitError};

/// Install the Prometheus recorder and its HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a forwarded HTTP request.
pub fn record_request(method: &str, status: u16, start_time: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start_time.elapsed().as_secs_f64());
}

pub fn record_tunnel_opened(active: u64) {
    ::metrics::counter!("ws_tunnels_total").increment(1);
    ::metrics::gauge!("ws_tunnels_active").set(active as f64);
}

pub fn record_tunnel_closed(active: u64) {
    ::metrics::gauge!("ws_tunnels_active").set(active as f64);
}

pub fn record_bytes(direction: Direction, bytes: usize) {
    ::metrics::counter!("ws_bytes_total", "direction" => direction.as_str()).increment(bytes as u64);
}

pub fn record_throttle_wait(direction: Direction, waited: Duration) {
    ::metrics::histogram!("ws_throttle_wait_seconds", "direction" => direction.as_str())
        .record(waited.as_secs_f64());
}

pub fn record_throttle_error(direction: Direction, error: &WaitError) {
    ::metrics::counter!(
        "ws_throttle_errors_total",
        "direction" => direction.as_str(),
        "kind" => error.kind()
    )
    .increment(1);
}

/// Observer that traces every throttle event and records it as a metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl ThrottleObserver for MetricsObserver {
    fn promoted(&self, upload_limited: bool, download_limited: bool) {
        tracing::debug!(upload_limited, download_limited, "Connection promoted");
    }

    fn throttled(&self, direction: Direction, bytes: usize, waited: Duration) {
        if !waited.is_zero() {
            tracing::debug!(%direction, bytes, waited_ms = waited.as_millis() as u64, "Throttled");
        }
        record_throttle_wait(direction, waited);
    }

    fn wait_failed(&self, direction: Direction, bytes: usize, error: &WaitError) {
        tracing::debug!(%direction, bytes, error = %error, "Token wait aborted");
        record_throttle_error(direction, error);
    }

    fn transferred(&self, direction: Direction, bytes: usize) {
        tracing::trace!(%direction, bytes, "Transferred");
        record_bytes(direction, bytes);
    }

    fn closed(&self) {
        tracing::debug!("Throttled stream closed");
    }
}
