//! Output sinks for the Vigil event bus.
//!
//! - [`LocalFileSink`]: append-only JSON lines on disk, rotated by size
//! - [`BroadcastSink`] and [`BroadcastServer`]: live WebSocket fan-out with a
//!   backlog for late subscribers
//! - [`ForwarderSink`]: batches to a remote HTTP event collector

pub mod broadcast;
pub mod forwarder;
pub mod local;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use broadcast::{BroadcastConfig, BroadcastHub, BroadcastServer, BroadcastSink, Subscription};
pub use forwarder::{ForwarderConfig, ForwarderSink};
pub use local::{LocalFileConfig, LocalFileSink};

/// Errors raised while constructing an output.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid output configuration: {0}")]
    InvalidConfig(String),
}
