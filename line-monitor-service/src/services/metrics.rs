//! Metrics collection for line-monitor-service.
//!
//! Counters go through the `metrics` facade; the Prometheus recorder renders
//! them on `/metrics`. Recording is a no-op until `init_metrics` runs, so
//! library code and tests can record freely.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_collection(provider: &str, outcome: &'static str) {
    metrics::counter!(
        "line_monitor_collections_total",
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_measurement(outcome: &'static str, duration: Duration) {
    metrics::counter!("line_monitor_measurements_total", "outcome" => outcome).increment(1);
    metrics::histogram!("line_monitor_measurement_duration_seconds")
        .record(duration.as_secs_f64());
}

pub fn record_delivery_attempt(channel: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "line_monitor_delivery_attempts_total",
        "channel" => channel.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_cycle(outcome: &'static str, duration: Duration) {
    metrics::counter!("line_monitor_cycles_total", "outcome" => outcome).increment(1);
    metrics::histogram!("line_monitor_cycle_duration_seconds").record(duration.as_secs_f64());
}
