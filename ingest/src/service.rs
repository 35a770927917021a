use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::api::{EventsResponse, HealthResponse, IngestError, PublishResponse, StatsResponse};
use crate::consumer::EventConsumer;
use crate::dedup::DedupStore;
use crate::event::Event;
use crate::metrics::report_dropped_events;
use crate::queue::EventQueue;
use crate::time::TimeSource;

/// Queue occupancy (in tenths of capacity) past which the health endpoint
/// stops reporting healthy.
const QUEUE_HIGH_WATER_TENTHS: usize = 9;

/// Payload key under which query results expose the commit time.
const PROCESSED_AT_KEY: &str = "processed_at";

/// Process-wide container for the ingestion pipeline: the dedup store, the
/// bounded queue, the consumer handle and the request-path counters. Built
/// once at startup and handed to every request handler.
pub struct IngestService {
    store: Arc<DedupStore>,
    queue: Arc<EventQueue>,
    consumer: Arc<EventConsumer>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    received: AtomicU64,
    started_at: Instant,
}

impl IngestService {
    pub fn new(
        store: Arc<DedupStore>,
        queue: Arc<EventQueue>,
        consumer: Arc<EventConsumer>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        Self {
            store,
            queue,
            consumer,
            timesource,
            received: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Admits events in request order. A key already processed (or already
    /// admitted earlier in this same request) counts as a duplicate and is
    /// not enqueued; a full queue drops the event, which counts as neither
    /// accepted nor duplicate. The dedup check here is a fast path only:
    /// the consumer's commit remains the authoritative decision.
    pub async fn publish(&self, events: Vec<Event>) -> Result<PublishResponse, IngestError> {
        let received = events.len() as u64;
        self.received.fetch_add(received, Ordering::Relaxed);
        metrics::counter!("ingest_events_received_total").increment(received);

        let mut accepted = 0u64;
        let mut duplicates = 0u64;
        let mut admitted: HashSet<(String, String)> = HashSet::new();

        for event in events {
            let key = (event.topic.clone(), event.event_id.clone());
            let duplicate = admitted.contains(&key)
                || self.store.is_duplicate(&event.topic, &event.event_id).await?;

            if duplicate {
                duplicates += 1;
                tracing::info!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "duplicate rejected at publish"
                );
                continue;
            }

            if self.queue.enqueue(event) {
                admitted.insert(key);
                accepted += 1;
            } else {
                report_dropped_events("queue_full", 1);
            }
        }

        tracing::info!(received, accepted, duplicates, "publish handled");

        Ok(PublishResponse {
            received,
            accepted,
            duplicates,
            message: format!(
                "Received {} events, accepted {}, rejected {} duplicates",
                received, accepted, duplicates
            ),
        })
    }

    /// Processed events for one topic, most recent first, with the commit
    /// time exposed in the payload under a reserved key.
    pub async fn query_events(&self, topic: &str, limit: i64) -> Result<EventsResponse, IngestError> {
        let records = self.store.get_events_by_topic(topic, Some(limit)).await?;

        let events: Vec<Event> = records
            .into_iter()
            .map(|record| Event {
                topic: topic.to_string(),
                event_id: record.event_id,
                timestamp: record.timestamp,
                source: record.source,
                payload: HashMap::from([(
                    PROCESSED_AT_KEY.to_string(),
                    Value::String(record.processed_at),
                )]),
            })
            .collect();

        Ok(EventsResponse {
            topic: topic.to_string(),
            count: events.len() as u64,
            events,
        })
    }

    /// `duplicate_dropped` counts only commit-time races; duplicates caught
    /// at admission show up in the publish responses instead.
    pub async fn stats(&self) -> Result<StatsResponse, IngestError> {
        let uptime = self.started_at.elapsed();

        Ok(StatsResponse {
            received: self.received.load(Ordering::Relaxed),
            unique_processed: self.store.get_processed_count().await?,
            duplicate_dropped: self.consumer.duplicate_count(),
            topics: self.store.get_topics().await?,
            uptime_seconds: uptime.as_secs_f64(),
            uptime_human: format_uptime(uptime),
        })
    }

    pub fn health(&self) -> HealthResponse {
        let queue_size = self.queue.qsize();
        let consumer_running = self.consumer.running();
        let below_high_water =
            queue_size * 10 < self.queue.capacity() * QUEUE_HIGH_WATER_TENTHS;

        let status = if consumer_running && below_high_water {
            "healthy"
        } else {
            "degraded"
        };

        HealthResponse {
            status: status.to_string(),
            consumer_running,
            queue_size: queue_size as u64,
            timestamp: self.timesource.current_time(),
        }
    }
}

fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}
