//! Ingress adapters.
//!
//! Everything enters the bus through an [`EventSubmitter`]: in-process
//! collectors hold one directly, and the Unix socket listener in [`socket`]
//! feeds one from external producers.

pub mod socket;

use crate::dedup::{DedupFilter, DedupVerdict};
use crate::overflow::OverflowBuffer;
use crate::queue::EventQueue;
use crate::stats::BusStats;
use crate::validate::normalize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use vigil_event_types::{Event, RawEvent};

pub use socket::{send_payload, FramingMode, SocketConfig, SocketIngress};

/// Ingress errors.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid socket path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("message is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("connection idle for {0:?}")]
    Idle(Duration),
}

/// Shared front half of the pipeline: normalize, dedup, enqueue or spill.
pub(crate) struct Intake {
    pub(crate) queue: EventQueue,
    pub(crate) overflow: Arc<OverflowBuffer>,
    pub(crate) dedup: Option<DedupFilter>,
    pub(crate) stats: Arc<BusStats>,
}

impl Intake {
    pub(crate) fn submit(&self, raw: RawEvent) {
        self.stats.events_received.inc();

        let normalized = normalize(raw);
        if !normalized.warnings.is_empty() {
            self.stats
                .validation_warnings
                .inc_by(normalized.warnings.len() as u64);
            for warning in &normalized.warnings {
                warn!(
                    event_id = %normalized.event.id,
                    field = warning.field,
                    value = %warning.value,
                    reason = warning.reason,
                    "Event validation warning"
                );
            }
        }

        if let Some(dedup) = &self.dedup {
            let verdict = dedup.check(&normalized.event, !normalized.id_generated);
            if verdict == DedupVerdict::Suppressed {
                self.stats.events_suppressed.inc();
                debug!(event_id = %normalized.event.id, "Suppressed duplicate event");
                return;
            }
        }

        self.enqueue(normalized.event);
    }

    /// Queue without waiting; spill to disk when the queue is full or closed.
    fn enqueue(&self, event: Event) {
        let Err(rejected) = self.queue.try_enqueue(event) else {
            return;
        };
        self.spill(&rejected.into_event());
    }

    fn spill(&self, event: &Event) {
        match self.overflow.append(event) {
            Ok(()) => {
                self.stats.events_buffered.inc();
            }
            Err(e) => {
                self.stats.events_dropped.inc();
                self.overflow.report_write_failure(event, &e);
            }
        }
    }

    /// Write events that no sink can take yet to the overflow buffer and
    /// seal the segment so a later replay or run picks them up.
    pub(crate) fn park(&self, events: &[Event]) {
        for event in events {
            self.spill(event);
        }
        self.overflow.seal();
    }
}

/// Cloneable, non-blocking handle for submitting events.
#[derive(Clone)]
pub struct EventSubmitter {
    intake: Arc<Intake>,
}

impl EventSubmitter {
    pub(crate) fn new(intake: Arc<Intake>) -> Self {
        Self { intake }
    }

    /// Submit a raw event. Never blocks and never fails; problems are
    /// logged and counted.
    pub fn submit(&self, raw: RawEvent) {
        self.intake.submit(raw);
    }

    /// Count a malformed or rejected ingress message.
    pub fn record_ingress_error(&self) {
        self.intake.stats.ingress_errors.inc();
    }
}
