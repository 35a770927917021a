use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::dedup::DedupStore;
use crate::event::Event;
use crate::metrics::report_dropped_events;
use crate::queue::EventQueue;
use crate::sink::EventSink;

/// Upper bound on a single dequeue wait, so that a stop request is observed
/// within this much time even on an idle queue.
const DEQUEUE_WAIT: Duration = Duration::from_secs(1);

/// The single background worker that drains the queue. For each event it
/// commits the key to the dedup store and only then invokes the sink; the
/// insert is the authoritative dedup decision, so a concurrent duplicate
/// that lost the race is counted and dropped here.
pub struct EventConsumer {
    queue: Arc<EventQueue>,
    store: Arc<DedupStore>,
    sink: Arc<dyn EventSink + Send + Sync>,
    liveness: HealthHandle,
    running: AtomicBool,
    processed: AtomicU64,
    duplicates: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventConsumer {
    pub fn new(
        queue: Arc<EventQueue>,
        store: Arc<DedupStore>,
        sink: Arc<dyn EventSink + Send + Sync>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            queue,
            store,
            sink,
            liveness,
            running: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker task. A no-op if already running.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("consumer already running");
            return;
        }

        let consumer = self.clone();
        let handle = tokio::spawn(async move { consumer.run().await });
        *self.worker.lock().await = Some(handle);

        tracing::info!("event consumer started");
    }

    /// Clears the running flag and waits for the worker to exit, which takes
    /// at most about one dequeue wait. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(err) = handle.await {
                tracing::error!("consumer worker failed to join: {}", err);
            }
        }

        tracing::info!("event consumer stopped");
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn queue_size(&self) -> usize {
        self.queue.qsize()
    }

    async fn run(&self) {
        tracing::info!("consumer loop started");

        while self.running.load(Ordering::SeqCst) {
            self.liveness.report_healthy().await;

            let event = match timeout(DEQUEUE_WAIT, self.queue.dequeue()).await {
                Ok(Some(event)) => event,
                // Queue dropped, nothing more will arrive.
                Ok(None) => break,
                // Timed out: loop around and re-check the running flag.
                Err(_) => continue,
            };

            self.process(event).await;
        }

        tracing::info!("consumer loop ended");
    }

    async fn process(&self, event: Event) {
        let committed = self
            .store
            .mark_processed(&event.topic, &event.event_id, &event.timestamp, &event.source)
            .await;

        match committed {
            Ok(true) => {
                if let Err(err) = self.sink.handle(&event).await {
                    // The key is already committed, so the event will not be
                    // redelivered through this service.
                    tracing::error!(
                        topic = %event.topic,
                        event_id = %event.event_id,
                        "sink failed: {:#}",
                        err
                    );
                    return;
                }
                self.processed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    source = %event.source,
                    "event processed"
                );
            }
            Ok(false) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                report_dropped_events("duplicate_at_commit", 1);
                tracing::warn!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "duplicate event dropped at commit"
                );
            }
            Err(err) => {
                // Dropped without a commit; the publisher's retry is the
                // recovery path.
                tracing::error!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "failed to commit event: {}",
                    err
                );
            }
        }
    }
}
