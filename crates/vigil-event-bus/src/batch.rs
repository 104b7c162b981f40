//! Batch formation.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;
use vigil_event_types::Event;

/// Configuration for batch collection.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum events per batch.
    pub max_batch_size: usize,
    /// Maximum time the oldest pending event waits before flushing.
    pub max_batch_age: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_batch_age: Duration::from_millis(100),
        }
    }
}

/// An immutable group of events delivered to every sink together.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Sequence number, increasing in formation order.
    pub id: u64,
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    pub fn new(id: u64, events: Vec<Event>) -> Self {
        Self {
            id,
            events,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Batch collector that aggregates events.
pub struct BatchCollector {
    config: BatchConfig,
    pending: Vec<Event>,
    oldest: Option<Instant>,
    next_id: u64,
}

impl BatchCollector {
    /// Create a new collector.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.max_batch_size),
            config,
            oldest: None,
            next_id: 1,
        }
    }

    /// Add an event to the current batch.
    /// Returns Some(batch) if the batch is ready to flush.
    pub fn add(&mut self, event: Event) -> Option<EventBatch> {
        if self.pending.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.pending.push(event);

        if self.should_flush() {
            self.take_batch()
        } else {
            None
        }
    }

    /// Check if current batch should be flushed.
    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.config.max_batch_size || self.is_due()
    }

    /// Check if batch is due based on age alone.
    pub fn is_due(&self) -> bool {
        self.oldest
            .map_or(false, |oldest| oldest.elapsed() >= self.config.max_batch_age)
    }

    /// Take the pending events as a batch, if there are any.
    pub fn take_batch(&mut self) -> Option<EventBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let events = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.max_batch_size),
        );
        self.oldest = None;
        let batch = EventBatch::new(self.next_id, events);
        self.next_id += 1;
        Some(batch)
    }

    /// Check if there are pending events.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Form batches from the queue until shutdown, then drain.
///
/// On shutdown the queue is closed, everything already queued is collected,
/// and the final partial batch is sent before returning. Returns early if
/// the dispatcher goes away.
pub async fn batch_processing_loop(
    mut receiver: mpsc::Receiver<Event>,
    batch_sender: mpsc::Sender<EventBatch>,
    config: BatchConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut collector = BatchCollector::new(config.clone());
    let tick = (config.max_batch_age / 2).max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => {
                    if let Some(batch) = collector.add(event) {
                        debug!(batch = batch.id, events = batch.len(), "Flushing batch (size limit)");
                        if batch_sender.send(batch).await.is_err() {
                            return;
                        }
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                if collector.is_due() {
                    if let Some(batch) = collector.take_batch() {
                        debug!(batch = batch.id, events = batch.len(), "Flushing batch (time limit)");
                        if batch_sender.send(batch).await.is_err() {
                            return;
                        }
                    }
                }
            }
            _ = crate::shutdown::stopped(&mut shutdown) => {
                receiver.close();
                break;
            }
        }
    }

    // Drain whatever is still queued, then flush the partial batch.
    while let Some(event) = receiver.recv().await {
        if let Some(batch) = collector.add(event) {
            if batch_sender.send(batch).await.is_err() {
                return;
            }
        }
    }
    if let Some(batch) = collector.take_batch() {
        debug!(batch = batch.id, events = batch.len(), "Flushing final batch");
        let _ = batch_sender.send(batch).await;
    }
}
