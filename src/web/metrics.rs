//! Prometheus metrics
//!
//! All collectors live in the default registry and are exposed in the text
//! format on `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Requests per authenticated environment
    pub static ref HTTP_REQUESTS_ENVIRONMENT: IntCounterVec = register_int_counter_vec!(
        "http_requests_environment",
        "Number of requests per environment",
        &["environment", "method", "status", "handler"]
    ).unwrap();

    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "zonegate_requests_total",
        "Total number of requests handled by the proxy",
        &["method", "status"]
    ).unwrap();

    /// Authorization decisions by resource kind
    pub static ref DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "zonegate_decisions_total",
        "Authorization decisions by resource kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref UPSTREAM_DURATION: Histogram = register_histogram!(
        "zonegate_upstream_duration_seconds",
        "Duration of PowerDNS API calls in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref AUDIT_FAILURES: IntCounter = register_int_counter!(
        "zonegate_audit_failures_total",
        "Audit log entries that could not be written"
    ).unwrap();

    pub static ref CONFIG_RELOADS: IntCounterVec = register_int_counter_vec!(
        "zonegate_config_reloads_total",
        "Configuration reload attempts",
        &["status"]
    ).unwrap();
}

pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

pub fn record_environment_request(environment: &str, method: &str, status: u16, handler: &str) {
    HTTP_REQUESTS_ENVIRONMENT
        .with_label_values(&[environment, method, &status.to_string(), handler])
        .inc();
}

pub fn record_decision(kind: &str, outcome: &str) {
    DECISIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_config_reload(status: &str) {
    CONFIG_RELOADS.with_label_values(&[status]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn encode() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
