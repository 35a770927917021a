use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::event::Event;

/// Downstream handler invoked once per committed event. The commit happens
/// before the sink runs, so an implementation may be called zero or one
/// time per key, never more.
#[async_trait]
pub trait EventSink {
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Sink that just logs the event.
pub struct LogSink {}

#[async_trait]
impl EventSink for LogSink {
    async fn handle(&self, event: &Event) -> Result<()> {
        metrics::counter!("ingest_events_handled_total").increment(1);
        tracing::info!(
            topic = %event.topic,
            event_id = %event.event_id,
            source = %event.source,
            "event handled"
        );
        Ok(())
    }
}

/// Sink that sleeps before acknowledging, standing in for a slow downstream.
pub struct DelaySink {
    delay: Duration,
}

impl DelaySink {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl EventSink for DelaySink {
    async fn handle(&self, event: &Event) -> Result<()> {
        tokio::time::sleep(self.delay).await;

        metrics::counter!("ingest_events_handled_total").increment(1);
        tracing::debug!(
            topic = %event.topic,
            event_id = %event.event_id,
            "event handled"
        );
        Ok(())
    }
}
