//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reconcile_cycles_total` (counter): cycles by `outcome`
//! - `reconcile_operations_applied_total` (counter): committed operations by `risk`
//! - `reconcile_rollbacks_total` (counter): cycles that had to roll back
//! - `reconcile_applied_version` (gauge): version of the published snapshot
//!
//! Recording is always cheap; nothing is exported unless [`init_metrics`]
//! installed the Prometheus recorder.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::diff::RiskLevel;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cycle(outcome: &'static str) {
    metrics::counter!("reconcile_cycles_total", "outcome" => outcome).increment(1);
}

pub fn record_operation(risk: RiskLevel) {
    metrics::counter!("reconcile_operations_applied_total", "risk" => risk.as_str()).increment(1);
}

pub fn record_rollback() {
    metrics::counter!("reconcile_rollbacks_total").increment(1);
}

pub fn record_applied_version(version: u64) {
    metrics::gauge!("reconcile_applied_version").set(version as f64);
}
