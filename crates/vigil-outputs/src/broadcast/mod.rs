//! Live broadcast to WebSocket subscribers.
//!
//! [`BroadcastHub`] keeps the subscriber list and a bounded backlog of
//! recent events. [`BroadcastSink`] publishes each batch to the hub and
//! [`BroadcastServer`] accepts subscriber connections.
//!
//! Messages are JSON text frames:
//!
//! ```json
//! {"type": "backlog", "count": 2, "events": [...], "timestamp": "..."}
//! {"type": "batch", "count": 50, "events": [...], "timestamp": "..."}
//! ```
//!
//! Every subscriber gets exactly one `backlog` message first, then every
//! batch published after it joined.

mod compress;
mod server;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use vigil_event_bus::{EventBatch, Sink, SinkError};

pub use compress::{compress_context, decompress_context, CONTEXT_ENCODING};
pub use server::BroadcastServer;

/// Broadcast settings.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Listen address, e.g. `127.0.0.1:9765`.
    pub bind: String,
    /// Recent events sent to each new subscriber.
    pub backlog_size: usize,
    /// Contexts whose serialized size exceeds this are compressed.
    pub compress_threshold: usize,
    pub max_subscribers: usize,
    /// Outbound messages queued per subscriber before it is dropped.
    pub subscriber_queue: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9765".to_string(),
            backlog_size: 100,
            compress_threshold: 1024,
            max_subscribers: 64,
            subscriber_queue: 256,
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<str>>,
}

#[derive(Default)]
struct HubState {
    backlog: VecDeque<Value>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    closed: bool,
}

/// A registered subscriber's message stream.
pub struct Subscription {
    pub id: u64,
    rx: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    /// Next message, or `None` once the subscriber has been removed or the
    /// hub closed.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

/// Subscriber registry and backlog.
pub struct BroadcastHub {
    config: BroadcastConfig,
    state: Mutex<HubState>,
}

impl BroadcastHub {
    pub fn new(config: BroadcastConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(HubState::default()),
        })
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Register a subscriber and queue its backlog message.
    ///
    /// The backlog snapshot and the registration happen under one lock, so
    /// a concurrent publish lands either in the backlog or in the live
    /// stream, never both or neither. Returns `None` when the hub is full
    /// or closed.
    pub fn subscribe(&self) -> Option<Subscription> {
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue.max(1));
        let mut state = self.state.lock();
        if state.closed || state.subscribers.len() >= self.config.max_subscribers {
            return None;
        }

        let events: Vec<Value> = state.backlog.iter().cloned().collect();
        let backlog = envelope("backlog", events);
        // Fresh channel with room for at least one message.
        if tx.try_send(backlog).is_err() {
            return None;
        }

        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push(Subscriber { id, tx });
        debug!(subscriber = id, subscribers = state.subscribers.len(), "Subscriber joined");
        Some(Subscription { id, rx })
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Push a batch to every subscriber and into the backlog.
    ///
    /// Subscribers whose queue is full or whose connection is gone are
    /// removed. Returns how many subscribers received the batch.
    pub fn publish(&self, batch: &EventBatch) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let events: Vec<Value> = batch
            .iter()
            .map(|event| compress_context(event, self.config.compress_threshold))
            .collect();
        let message = envelope("batch", events.clone());

        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }

        for event in events {
            state.backlog.push_back(event);
        }
        while state.backlog.len() > self.config.backlog_size {
            state.backlog.pop_front();
        }

        let before = state.subscribers.len();
        state.subscribers.retain(|subscriber| match subscriber.tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = subscriber.id, "Subscriber too slow, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        let delivered = state.subscribers.len();
        if delivered < before {
            debug!(removed = before - delivered, "Removed broadcast subscribers");
        }
        delivered
    }

    /// Drop every subscriber and refuse new ones.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

fn envelope(kind: &str, events: Vec<Value>) -> Arc<str> {
    let message = json!({
        "type": kind,
        "count": events.len(),
        "events": events,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    Arc::from(message.to_string())
}

/// Sink adapter publishing every batch to a [`BroadcastHub`].
pub struct BroadcastSink {
    hub: Arc<BroadcastHub>,
}

impl BroadcastSink {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }
}

#[async_trait]
impl Sink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn accept(&self, batch: Arc<EventBatch>) -> Result<(), SinkError> {
        let delivered = self.hub.publish(&batch);
        debug!(batch = batch.id, subscribers = delivered, "Broadcast batch");
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.hub.close();
        Ok(())
    }
}
