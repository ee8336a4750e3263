//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submissions by intent kind
//! - Approval transactions
//! - Failures by pipeline stage
//! - Gas cache refreshes

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter, TextEncoder,
};
use tracing::warn;

lazy_static! {
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "widget_submissions_total",
        "Total transactions broadcast by intent kind",
        &["kind"]
    ).unwrap();

    pub static ref APPROVALS: IntCounter = register_int_counter!(
        "widget_approvals_total",
        "Total approve transactions broadcast"
    ).unwrap();

    pub static ref FAILURES: CounterVec = register_counter_vec!(
        "widget_failures_total",
        "Total failed submissions by pipeline stage",
        &["stage"]
    ).unwrap();

    pub static ref GAS_REFRESH: CounterVec = register_counter_vec!(
        "widget_gas_refresh_total",
        "Gas price cache refreshes by outcome",
        &["outcome"]
    ).unwrap();
}

/// Render all registered metrics in the text exposition format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_submission(kind: &str) {
    SUBMISSIONS.with_label_values(&[kind]).inc();
}

pub fn record_approval() {
    APPROVALS.inc();
}

pub fn record_failure(stage: &str) {
    FAILURES.with_label_values(&[stage]).inc();
}

pub fn record_gas_refresh(outcome: &str) {
    GAS_REFRESH.with_label_values(&[outcome]).inc();
}
