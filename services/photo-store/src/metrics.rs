//! Prometheus metrics exposition
//!
//! - `photo_store_requests_total` (counter): labels `route`, `status`
//! - `photo_store_request_duration_seconds` (histogram): label `route`
//!
//! The SkyDrive client records `skydrive_api_requests_total` and
//! `skydrive_token_refreshes_total` through the same global recorder.

use std::time::Instant;

use axum::response::Response;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "photo_store_request_duration_seconds";

/// Uploads and downloads go through SkyDrive, so the range extends past a minute.
const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request against its route label.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("photo_store_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route).record(duration_secs);
}

/// Record `response` for `route` and hand it back.
pub fn finish(route: &'static str, started: Instant, response: Response) -> Response {
    record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
