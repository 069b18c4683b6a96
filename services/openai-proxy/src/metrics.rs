//! Prometheus metrics exposition
//!
//! - `gateway_requests_total` (counter): labels `status`, `endpoint`
//! - `gateway_request_duration_seconds` (histogram): label `endpoint`
//! - `gateway_upstream_signals_total` (counter): label `signal` — classified
//!   retryable signals observed on the stream
//! - `gateway_failovers_total` (counter): cookie switches within one request
//! - `gateway_cookie_lockouts_total` (counter): cooldown locks applied

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The duration histogram gets explicit buckets so it renders as a Prometheus
/// histogram (with `_bucket` lines) rather than a summary. Generation can be
/// slow, so the buckets stretch from 5ms to 600s.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.05, 0.25, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with its status code and endpoint label.
pub fn record_request(status: u16, endpoint: &'static str, duration_secs: f64) {
    metrics::counter!(
        "gateway_requests_total",
        "status" => status.to_string(),
        "endpoint" => endpoint
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "endpoint" => endpoint)
        .record(duration_secs);
}

/// Record one classified retryable signal observed on an upstream stream.
pub fn record_upstream_signal(signal: &'static str) {
    metrics::counter!("gateway_upstream_signals_total", "signal" => signal).increment(1);
}

/// Record a failover to the next cookie.
pub fn record_failover() {
    metrics::counter!("gateway_failovers_total").increment(1);
}

/// Record a cooldown lock applied to a cookie.
pub fn record_lockout() {
    metrics::counter!("gateway_cookie_lockouts_total").increment(1);
}
