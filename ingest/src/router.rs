use std::future::ready;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use health::HealthRegistry;
use tower_http::trace::TraceLayer;

use crate::ingest;
use crate::metrics::{setup_metrics_recorder, track_metrics};
use crate::service::IngestService;

#[derive(Clone)]
pub struct State {
    pub service: Arc<IngestService>,
}

pub fn router(service: Arc<IngestService>, liveness: HealthRegistry, metrics: bool) -> Router {
    let state = State { service };

    let router = Router::new()
        .route("/", get(ingest::index))
        .route("/publish", post(ingest::publish))
        .route("/events", get(ingest::events))
        .route("/stats", get(ingest::stats))
        .route("/health", get(ingest::health))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Installing a global recorder when the router is built as a library
    // (tests etc) does not work well, so only do it when asked to.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
