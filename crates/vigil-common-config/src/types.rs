//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Core bus settings.
    pub bus: BusSection,
    /// Duplicate suppression.
    pub dedup: DedupSection,
    /// Batch formation and delivery.
    pub batch: BatchSection,
    /// Disk overflow buffer.
    pub overflow: OverflowSection,
    /// Socket ingress.
    pub ingress: IngressSection,
    /// Output sinks.
    pub outputs: OutputsSection,
    /// Statistics reporting.
    pub stats: StatsSection,
}

impl VigilConfig {
    /// Data directory with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.bus.data_dir)
    }

    /// Directory holding overflow segments.
    pub fn overflow_dir(&self) -> PathBuf {
        match &self.overflow.dir {
            Some(dir) => expand_home(dir),
            None => self.data_dir().join("event_buffer"),
        }
    }

    /// Directory holding the durable local event files.
    pub fn local_output_dir(&self) -> PathBuf {
        match &self.outputs.local.path {
            Some(dir) => expand_home(dir),
            None => self.data_dir().join("events"),
        }
    }
}

/// Expand a leading `~` using `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

/// Core bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// In-memory queue capacity (events).
    pub queue_capacity: usize,
    /// Base directory for buffered and stored events.
    pub data_dir: String,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            data_dir: "~/.vigil".to_string(),
        }
    }
}

/// Duplicate suppression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    /// Enable duplicate suppression.
    pub enabled: bool,
    /// Suppression window (ms).
    pub window_ms: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 5_000,
        }
    }
}

/// Batch formation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    /// Maximum events per batch.
    pub max_batch_size: usize,
    /// Maximum batch age before flushing (ms).
    pub max_batch_age_ms: u64,
    /// Batches waiting for the dispatcher before the scheduler waits.
    pub max_in_flight: usize,
    /// Batches queued per sink; a sink further behind misses batches.
    pub sink_queue: usize,
    /// Per-sink delivery timeout (ms).
    pub sink_timeout_ms: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_batch_age_ms: 100,
            max_in_flight: 8,
            sink_queue: 256,
            sink_timeout_ms: 30_000,
        }
    }
}

/// Disk overflow buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowSection {
    /// Segment directory (defaults to `<data_dir>/event_buffer`).
    pub dir: Option<String>,
    /// Replay scan interval (ms).
    pub replay_interval_ms: u64,
    /// Maximum segments replayed per scan.
    pub max_files_per_pass: usize,
}

impl Default for OverflowSection {
    fn default() -> Self {
        Self {
            dir: None,
            replay_interval_ms: 10_000,
            max_files_per_pass: 10,
        }
    }
}

/// How the ingress socket frames records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressMode {
    /// One JSON object per connection.
    #[default]
    Single,
    /// One JSON object per line, many per connection.
    Lines,
}

/// Socket ingress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressSection {
    /// Enable the socket listener.
    pub enabled: bool,
    /// Filesystem path of the Unix socket.
    pub socket_path: String,
    /// Record framing.
    pub mode: IngressMode,
    /// Close connections idle for this long (ms).
    pub idle_timeout_ms: u64,
    /// Largest accepted record (bytes).
    pub max_message_bytes: usize,
    /// Permission bits applied to the socket file.
    pub socket_permissions: u32,
}

impl Default for IngressSection {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: "/tmp/vigil.sock".to_string(),
            mode: IngressMode::Single,
            idle_timeout_ms: 5_000,
            max_message_bytes: 64 * 1024,
            socket_permissions: 0o666,
        }
    }
}

/// Output sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputsSection {
    /// Durable local file sink.
    pub local: LocalOutputConfig,
    /// Live WebSocket broadcast sink.
    pub broadcast: BroadcastOutputConfig,
    /// Remote HTTP forwarder sink.
    pub forwarder: ForwarderOutputConfig,
}

/// Durable local file sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOutputConfig {
    pub enabled: bool,
    /// Output directory (defaults to `<data_dir>/events`).
    pub path: Option<String>,
    /// Rotate files before they exceed this size (bytes).
    pub max_file_size: u64,
}

impl Default for LocalOutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// Live WebSocket broadcast sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastOutputConfig {
    pub enabled: bool,
    /// Listen address for subscribers.
    pub bind: String,
    /// Recent events replayed to new subscribers.
    pub backlog_size: usize,
    /// Contexts larger than this (bytes, serialized) are compressed.
    pub compress_threshold: usize,
    /// Maximum concurrent subscribers.
    pub max_subscribers: usize,
    /// Outbound messages queued per subscriber before it is dropped.
    pub subscriber_queue: usize,
}

impl Default for BroadcastOutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:9765".to_string(),
            backlog_size: 100,
            compress_threshold: 1024,
            max_subscribers: 64,
            subscriber_queue: 256,
        }
    }
}

/// Remote HTTP forwarder sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderOutputConfig {
    pub enabled: bool,
    /// Collector base URL.
    pub url: String,
    /// Collector token, sent as `Authorization: Splunk <token>`.
    pub token: Option<String>,
    /// Target index.
    pub index: String,
    /// Events per request.
    pub batch_size: usize,
    /// Events kept for retry before the oldest are dropped.
    pub max_buffered: usize,
    /// Request timeout (ms).
    pub timeout_ms: u64,
}

impl Default for ForwarderOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            token: None,
            index: "vigil".to_string(),
            batch_size: 100,
            max_buffered: 10_000,
            timeout_ms: 10_000,
        }
    }
}

/// Statistics reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    /// Interval between statistics log lines (ms, 0 disables).
    pub report_interval_ms: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            report_interval_ms: 60_000,
        }
    }
}
