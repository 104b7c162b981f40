//! Host-local security telemetry event bus.
//!
//! The bus sits between event producers (in-process collectors and external
//! processes writing to a Unix socket) and an arbitrary set of output sinks:
//!
//! - [`validate`]: normalization of loosely structured producer input
//! - [`dedup`]: suppression of duplicate bursts within a time window
//! - [`queue`] and [`overflow`]: bounded in-memory queue with gzip disk spill
//!   and background replay
//! - [`batch`]: size- or age-triggered batch formation
//! - [`fanout`]: the [`Sink`] trait and concurrent, isolated delivery
//! - [`ingress`]: in-process submission and the Unix socket listener
//! - [`stats`]: counters and snapshots

mod bus;
pub mod batch;
pub mod dedup;
pub mod fanout;
pub mod ingress;
pub mod overflow;
pub mod queue;
pub mod shutdown;
pub mod stats;
pub mod validate;

pub use batch::{BatchConfig, EventBatch};
pub use bus::{BusConfig, BusError, EventBus};
pub use fanout::{Sink, SinkError, SinkRegistry};
pub use ingress::{send_payload, EventSubmitter, FramingMode, IngressError, SocketConfig, SocketIngress};
pub use overflow::{OverflowError, ReplayConfig};
pub use shutdown::ShutdownCoordinator;
pub use stats::{SinkStatsSnapshot, StatsSnapshot};
pub use validate::{normalize, Normalized, ValidationWarning};

// Re-export event types for convenience
pub use vigil_event_types::{Event, EventId, EventType, RawEvent, Severity};
