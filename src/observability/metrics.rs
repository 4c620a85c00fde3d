//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wizard_guard_rate_limited_total` (counter): refusals by operation class
//! - `wizard_guard_csrf_rejections_total` (counter): refusals by reason
//! - `wizard_guard_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `wizard_guard_retry_attempts_total` (counter): attempts by retry class
//! - `wizard_guard_token_verifications_total` (counter): signed token checks by outcome
//! - `wizard_guard_sweep_removed_total` (counter): entries purged by store

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rate_limited(operation: &'static str) {
    metrics::counter!("wizard_guard_rate_limited_total", "operation" => operation).increment(1);
}

pub fn record_csrf_rejection(reason: &'static str) {
    metrics::counter!("wizard_guard_csrf_rejections_total", "reason" => reason).increment(1);
}

pub fn record_breaker_state(dependency: &'static str, state: u8) {
    metrics::gauge!("wizard_guard_breaker_state", "dependency" => dependency).set(f64::from(state));
}

pub fn record_retry_attempt(class: &'static str) {
    metrics::counter!("wizard_guard_retry_attempts_total", "class" => class).increment(1);
}

pub fn record_token_verification(outcome: &'static str) {
    metrics::counter!("wizard_guard_token_verifications_total", "outcome" => outcome).increment(1);
}

pub fn record_sweep(store: &'static str, removed: usize) {
    metrics::counter!("wizard_guard_sweep_removed_total", "store" => store)
        .increment(removed as u64);
}
