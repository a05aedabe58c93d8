//! Metrics collection and exposition.
//!
//! # Metrics
//! - `storefront_requests_total` (counter): requests by method, status, route
//! - `storefront_request_duration_seconds` (histogram): latency distribution
//! - `storefront_rate_limited_total` (counter): rejections by tier
//! - `storefront_auth_failures_total` (counter): rejected credentials by reason
//! - `storefront_pool_leased` / `storefront_pool_idle` (gauge): pool occupancy
//! - `storefront_pool_wait_seconds` (histogram): time spent acquiring a lease
//! - `storefront_audit_dropped_total` (counter): audit events lost to a full buffer
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::db::PoolStatus;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    counter!(
        "storefront_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    histogram!("storefront_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(tier: &str) {
    counter!("storefront_rate_limited_total", "tier" => tier.to_string()).increment(1);
}

pub fn record_auth_failure(reason: &'static str) {
    counter!("storefront_auth_failures_total", "reason" => reason).increment(1);
}

pub fn record_pool(status: &PoolStatus) {
    gauge!("storefront_pool_leased").set(status.leased as f64);
    gauge!("storefront_pool_idle").set(status.idle as f64);
}

pub fn record_pool_wait(waited: Duration) {
    histogram!("storefront_pool_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_audit_dropped() {
    counter!("storefront_audit_dropped_total").increment(1);
}
