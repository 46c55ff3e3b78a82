//! Prometheus metrics for the job service.
//!
//! Job lifecycle metrics are recorded inside `crewdeck-jobs` through the
//! `metrics` facade; this module installs the recorder that collects them
//! and renders the `/metrics` output.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobs_created_total", "Jobs admitted, by kind");
    describe_counter!(
        "jobs_rejected_total",
        "Job creations refused, by reason (capacity, validation)"
    );
    describe_counter!(
        "jobs_finished_total",
        "Jobs that reached a terminal state, by kind and outcome"
    );
    describe_histogram!(
        "job_duration_seconds",
        "Time from start to terminal state, in seconds"
    );
    describe_gauge!("jobs_active", "Jobs currently pending or running");
    describe_gauge!("stream_subscribers", "Open WebSocket and SSE subscriptions");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record a creation request refused before it reached the store.
pub fn record_validation_rejection(kind: &str) {
    counter!("jobs_rejected_total", "reason" => "validation", "kind" => kind.to_string())
        .increment(1);
}

/// Track open stream subscriptions (`delta` is +1 on open, -1 on close).
pub fn record_stream_subscribers(delta: f64) {
    gauge!("stream_subscribers").increment(delta);
}
