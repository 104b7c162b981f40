//! Shared fixtures for event bus integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil_event_bus::{BusConfig, Event, EventBatch, EventBus, ReplayConfig, Sink, SinkError};

/// Records every event it is handed.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
    batches: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.id.as_str().to_string())
            .collect()
    }

    pub fn id_set(&self) -> HashSet<String> {
        self.ids().into_iter().collect()
    }

    pub fn batch_ids(&self) -> Vec<u64> {
        self.batches.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` events arrived or `within` elapsed.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.events.lock().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "collector"
    }

    async fn accept(&self, batch: Arc<EventBatch>) -> Result<(), SinkError> {
        self.batches.lock().push(batch.id);
        self.events.lock().extend(batch.iter().cloned());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Takes a fixed time over every batch.
pub struct SlowSink {
    delay: Duration,
    events: Mutex<usize>,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            events: Mutex::new(0),
        })
    }

    pub fn event_count(&self) -> usize {
        *self.events.lock()
    }
}

#[async_trait]
impl Sink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn accept(&self, batch: Arc<EventBatch>) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        *self.events.lock() += batch.len();
        Ok(())
    }
}

/// Settings tuned for fast tests: short batch age, quick replay, no
/// periodic statistics.
pub fn test_config(dir: &Path) -> BusConfig {
    let mut config = BusConfig::with_overflow_dir(dir.join("event_buffer"));
    config.batch.max_batch_age = Duration::from_millis(20);
    config.sink_timeout = Duration::from_secs(2);
    config.replay = ReplayConfig {
        interval: Duration::from_millis(50),
        max_files_per_pass: 10,
    };
    config.stats_interval = None;
    config
}

/// A started bus with one collecting sink.
pub async fn started_bus(config: BusConfig) -> (Arc<EventBus>, Arc<CollectingSink>) {
    let bus = EventBus::new(config).expect("bus");
    let sink = CollectingSink::new();
    bus.register_sink(sink.clone()).await;
    bus.start().await.expect("start");
    (bus, sink)
}
