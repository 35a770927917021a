use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dedup::DedupError;
use crate::event::Event;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("request holds no event")]
    EmptyBatch,
    #[error("{field} must be between 1 and 255 characters")]
    InvalidField { field: &'static str },
    #[error("timestamp must be an ISO-8601 date-time: {0:?}")]
    InvalidTimestamp(String),

    #[error("topic query parameter is required")]
    MissingTopic,
    #[error("limit must be between 1 and 1000")]
    InvalidLimit,

    #[error("storage error: {0}")]
    StorageError(#[from] DedupError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::RequestDecodingError(_)
            | IngestError::RequestParsingError(_)
            | IngestError::EmptyBatch
            | IngestError::InvalidField { .. }
            | IngestError::InvalidTimestamp(_)
            | IngestError::MissingTopic
            | IngestError::InvalidLimit => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),

            IngestError::StorageError(err) => {
                tracing::error!("storage error surfaced to client: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                )
            }
        }
        .into_response()
    }
}

#[derive(Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct PublishResponse {
    pub received: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct EventsResponse {
    pub topic: String,
    pub count: u64,
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct StatsResponse {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub topics: Vec<String>,
    pub uptime_seconds: f64,
    pub uptime_human: String,
}

#[derive(Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub consumer_running: bool,
    pub queue_size: u64,
    pub timestamp: String,
}
