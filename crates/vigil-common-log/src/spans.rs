//! Tracing spans for the event pipeline.

use std::time::{Duration, Instant};
use tracing::{debug_span, info_span, Span};

/// Span covering the delivery of one batch.
pub fn batch_span(batch_id: u64, events: usize) -> Span {
    debug_span!("batch", id = batch_id, events = events)
}

/// Span covering one sink's handling of a batch.
pub fn sink_span(sink: &str, batch_id: u64) -> Span {
    debug_span!("sink", name = %sink, batch = batch_id)
}

/// Span covering one ingress connection.
pub fn connection_span(transport: &'static str, peer: &str) -> Span {
    info_span!("connection", transport = transport, peer = %peer)
}

/// Measures an operation and logs its duration when finished.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log the elapsed time and return it.
    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = %duration.as_millis(),
            "operation completed"
        );
        duration
    }
}
