use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::IngestError;
use crate::time::is_valid_timestamp;

/// Upper bound on topic, event_id and source lengths.
pub const MAX_FIELD_CHARS: usize = 255;

/// The event envelope. The payload is carried through untouched; only the
/// envelope fields are validated. `event_id` is the publisher-assigned
/// idempotency key, unique within a topic.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    /// ISO-8601, validated at admission but stored verbatim.
    pub timestamp: String,
    pub source: String,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequest {
    /// Batch of events wrapped in an `events` array
    Batch { events: Vec<Event> },
    /// Single bare event
    One(Box<Event>),
}

impl RawRequest {
    fn events(self) -> Vec<Event> {
        match self {
            RawRequest::Batch { events } => events,
            RawRequest::One(event) => vec![*event],
        }
    }
}

impl Event {
    /// Decodes a publish body into a validated, non-empty list of events.
    /// Accepts either a single event object or `{"events": [...]}`.
    pub fn from_bytes(bytes: Bytes) -> Result<Vec<Event>, IngestError> {
        tracing::debug!(len = bytes.len(), "decoding publish request");

        let payload = String::from_utf8(bytes.into()).map_err(|e| {
            tracing::error!("failed to decode body: {}", e);
            IngestError::RequestDecodingError(String::from("invalid body encoding"))
        })?;

        let events = serde_json::from_str::<RawRequest>(&payload)?.events();
        if events.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        for event in &events {
            event.validate()?;
        }
        Ok(events)
    }

    /// Enforces the envelope constraints: topic, event_id and source are
    /// 1..=255 characters, and the timestamp parses as ISO-8601.
    pub fn validate(&self) -> Result<(), IngestError> {
        check_length("topic", &self.topic)?;
        check_length("event_id", &self.event_id)?;
        check_length("source", &self.source)?;
        if !is_valid_timestamp(&self.timestamp) {
            return Err(IngestError::InvalidTimestamp(self.timestamp.clone()));
        }
        Ok(())
    }
}

fn check_length(field: &'static str, value: &str) -> Result<(), IngestError> {
    let chars = value.chars().count();
    if chars == 0 || chars > MAX_FIELD_CHARS {
        return Err(IngestError::InvalidField { field });
    }
    Ok(())
}
