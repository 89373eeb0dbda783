//! Prometheus metrics exposition
//!
//! Service-level metrics registered here:
//!
//! - `api_requests_total` (counter): labels `status`, `method`
//! - `api_request_duration_seconds` (histogram): label `method`
//! - `api_row_updates_total` (counter): labels `dataset`, `outcome`
//!
//! The connection-pool crates emit their own `sql_*` counters; they render
//! through the same recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `api_request_duration_seconds` with explicit histogram buckets
/// so it renders as a Prometheus histogram (with `_bucket` lines for
/// `histogram_quantile()` queries) rather than the default summary. Bucket
/// boundaries cover 5ms to 60s, the range a paginated query or a full-table
/// download can plausibly take.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format served on `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("api_request_duration_seconds".to_string()),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    metrics::counter!("api_requests_total", "status" => status.to_string(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("api_request_duration_seconds", "method" => method.to_string())
        .record(duration_secs);
}

/// Record the outcome of one row update: "updated", "skipped" or "failed".
pub fn record_update_outcome(dataset: &'static str, outcome: &'static str) {
    metrics::counter!("api_row_updates_total", "dataset" => dataset, "outcome" => outcome)
        .increment(1);
}
