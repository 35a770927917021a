use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::event::Event;

/// Bounded in-memory FIFO of admitted events, built on a tokio channel.
///
/// Producers never block: a full queue drops the event and reports it, which
/// is the backpressure signal to the publisher. The single consumer side
/// waits cooperatively. Nothing here is persistent; an event lost with the
/// process is recovered by the publisher's at-least-once retry.
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    rx: Mutex<mpsc::Receiver<Event>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tracing::info!(capacity, "event queue initialized");
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Non-blocking enqueue. Returns false and drops the event when full.
    pub fn enqueue(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueues as many events as fit, in order. Returns the count enqueued;
    /// partial success is expected when the queue fills up mid-batch.
    pub fn enqueue_batch(&self, events: Vec<Event>) -> usize {
        let mut enqueued = 0;
        for event in events {
            if self.enqueue(event) {
                enqueued += 1;
            }
        }
        enqueued
    }

    /// Waits until an event is available and returns it. Returns None only
    /// once the queue itself has been dropped.
    pub async fn dequeue(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    /// Current depth. Approximate under concurrency.
    pub fn qsize(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.qsize() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
