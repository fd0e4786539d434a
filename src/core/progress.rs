//! Broadcast channel decoupling event production from consumption.
//!
//! Publishing never blocks and never fails observably: with no subscribers
//! the event is simply dropped, and a subscriber that falls behind the
//! channel capacity is cut loose instead of backpressuring the pipeline.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::domain::ProgressEvent;

/// Events buffered per subscriber before a laggard is dropped
pub const DEFAULT_CAPACITY: usize = 64;

/// Fan-out channel for progress events across all runs
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Fire-and-forget: a
    /// missing or slow subscriber never surfaces as an error here.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    /// Live feed of one run's events. No replay: events published before the
    /// subscription are not delivered.
    pub fn subscribe(&self, run_id: Uuid) -> ProgressStream {
        ProgressStream {
            filter: Some(run_id),
            rx: self.tx.subscribe(),
        }
    }

    /// Live feed of every run's events
    pub fn subscribe_all(&self) -> ProgressStream {
        ProgressStream {
            filter: None,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A per-subscriber ordered stream of progress events
pub struct ProgressStream {
    filter: Option<Uuid>,
    rx: broadcast::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next matching event. Returns `None` once the publisher is gone, or
    /// once this subscriber has lagged past the channel capacity and its
    /// backlog was discarded.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.filter.map_or(true, |id| event.run_id == id) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(_)) => return None,
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
