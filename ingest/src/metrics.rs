use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const SECONDS_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(SECONDS_BUCKETS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Counts events dropped on their way through the pipeline, by cause.
pub fn report_dropped_events(cause: &'static str, count: u64) {
    metrics::counter!("ingest_events_dropped_total", "cause" => cause).increment(count);
}

/// Middleware recording request counts and latency per method/path/status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("ingest_http_requests_total", &labels).increment(1);
    metrics::histogram!("ingest_http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
