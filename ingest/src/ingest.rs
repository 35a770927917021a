use axum::extract::{Query, State};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{EventsResponse, HealthResponse, IngestError, PublishResponse, StatsResponse};
use crate::event::Event;
use crate::router;

pub const MAX_QUERY_LIMIT: i64 = 1000;
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

pub async fn index() -> Json<Value> {
    Json(json!({
        "service": "event-ingest",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "publish": "POST /publish",
            "events": "GET /events?topic=...",
            "stats": "GET /stats",
            "health": "GET /health",
        }
    }))
}

/// Accepts either a single event or `{"events": [...]}`. Duplicates and
/// queue-full drops are reported in the body, not as error statuses.
pub async fn publish(
    state: State<router::State>,
    body: Bytes,
) -> Result<Json<PublishResponse>, IngestError> {
    let events = Event::from_bytes(body)?;
    tracing::debug!(count = events.len(), "decoded publish request");

    let response = state.service.publish(events).await?;
    Ok(Json(response))
}

#[derive(Deserialize, Default)]
pub struct EventsParams {
    pub topic: Option<String>,
    pub limit: Option<i64>,
}

pub async fn events(
    state: State<router::State>,
    params: Query<EventsParams>,
) -> Result<Json<EventsResponse>, IngestError> {
    let topic = params.0.topic.ok_or(IngestError::MissingTopic)?;
    let limit = params.0.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    if !(1..=MAX_QUERY_LIMIT).contains(&limit) {
        return Err(IngestError::InvalidLimit);
    }

    let response = state.service.query_events(&topic, limit).await?;
    Ok(Json(response))
}

pub async fn stats(state: State<router::State>) -> Result<Json<StatsResponse>, IngestError> {
    let response = state.service.stats().await?;
    Ok(Json(response))
}

pub async fn health(state: State<router::State>) -> Json<HealthResponse> {
    Json(state.service.health())
}
