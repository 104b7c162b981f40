//! Bus statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by a value.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Live counters shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct BusStats {
    /// Submissions seen, before duplicate suppression.
    pub events_received: Counter,
    /// Events handed to the fan-out registry, counted once per event.
    pub events_sent: Counter,
    /// Events lost for good: failed overflow writes and corrupt replay lines.
    pub events_dropped: Counter,
    /// Duplicates filtered inside the dedup window.
    pub events_suppressed: Counter,
    /// Events spilled to the overflow buffer.
    pub events_buffered: Counter,
    /// Events read back from the overflow buffer.
    pub events_replayed: Counter,
    /// Non-fatal validation warnings raised while normalizing.
    pub validation_warnings: Counter,
    /// Malformed or oversized socket messages.
    pub ingress_errors: Counter,
    /// Batches handed to the fan-out registry.
    pub batches_dispatched: Counter,
}

impl BusStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per-sink delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStatsSnapshot {
    /// Sink name.
    pub name: String,
    /// Batches accepted without error.
    pub delivered_batches: u64,
    /// Batches that failed, timed out or panicked.
    pub failed_batches: u64,
    /// Most recent failure.
    pub last_error: Option<String>,
}

/// Point-in-time view of the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub events_sent: u64,
    pub events_dropped: u64,
    /// Events currently waiting in memory.
    pub queue_size: usize,
    /// Overflow segments currently on disk.
    pub buffer_files: usize,
    pub events_suppressed: u64,
    pub events_buffered: u64,
    pub events_replayed: u64,
    pub validation_warnings: u64,
    pub ingress_errors: u64,
    pub batches_dispatched: u64,
    /// Per-sink counters, in registration order.
    pub sinks: Vec<SinkStatsSnapshot>,
}

impl StatsSnapshot {
    /// Capture the counters, filling in the gauges supplied by the caller.
    pub fn capture(
        stats: &BusStats,
        queue_size: usize,
        buffer_files: usize,
        sinks: Vec<SinkStatsSnapshot>,
    ) -> Self {
        Self {
            events_received: stats.events_received.get(),
            events_sent: stats.events_sent.get(),
            events_dropped: stats.events_dropped.get(),
            queue_size,
            buffer_files,
            events_suppressed: stats.events_suppressed.get(),
            events_buffered: stats.events_buffered.get(),
            events_replayed: stats.events_replayed.get(),
            validation_warnings: stats.validation_warnings.get(),
            ingress_errors: stats.ingress_errors.get(),
            batches_dispatched: stats.batches_dispatched.get(),
            sinks,
        }
    }
}
