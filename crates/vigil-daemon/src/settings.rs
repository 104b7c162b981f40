//! Translation from file configuration to component settings.

use std::path::PathBuf;
use std::time::Duration;
use vigil_common_config::{expand_home, IngressMode, VigilConfig};
use vigil_event_bus::{BatchConfig, BusConfig, FramingMode, ReplayConfig, SocketConfig};
use vigil_outputs::{BroadcastConfig, ForwarderConfig, LocalFileConfig};

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

pub fn bus_config(config: &VigilConfig) -> BusConfig {
    BusConfig {
        queue_capacity: config.bus.queue_capacity,
        dedup_window: config.dedup.enabled.then(|| millis(config.dedup.window_ms)),
        batch: BatchConfig {
            max_batch_size: config.batch.max_batch_size,
            max_batch_age: millis(config.batch.max_batch_age_ms),
        },
        max_in_flight: config.batch.max_in_flight,
        sink_queue: config.batch.sink_queue,
        sink_timeout: millis(config.batch.sink_timeout_ms),
        overflow_dir: config.overflow_dir(),
        replay: ReplayConfig {
            interval: millis(config.overflow.replay_interval_ms),
            max_files_per_pass: config.overflow.max_files_per_pass,
        },
        stats_interval: match config.stats.report_interval_ms {
            0 => None,
            ms => Some(millis(ms)),
        },
    }
}

pub fn socket_config(config: &VigilConfig) -> SocketConfig {
    let ingress = &config.ingress;
    SocketConfig {
        path: expand_home(&ingress.socket_path),
        mode: match ingress.mode {
            IngressMode::Single => FramingMode::Single,
            IngressMode::Lines => FramingMode::Lines,
        },
        idle_timeout: millis(ingress.idle_timeout_ms),
        max_message_bytes: ingress.max_message_bytes,
        permissions: ingress.socket_permissions,
    }
}

pub fn local_config(config: &VigilConfig) -> LocalFileConfig {
    LocalFileConfig {
        dir: config.local_output_dir(),
        max_file_size: config.outputs.local.max_file_size,
    }
}

pub fn broadcast_config(config: &VigilConfig) -> BroadcastConfig {
    let broadcast = &config.outputs.broadcast;
    BroadcastConfig {
        bind: broadcast.bind.clone(),
        backlog_size: broadcast.backlog_size,
        compress_threshold: broadcast.compress_threshold,
        max_subscribers: broadcast.max_subscribers,
        subscriber_queue: broadcast.subscriber_queue,
    }
}

pub fn forwarder_config(config: &VigilConfig) -> ForwarderConfig {
    let forwarder = &config.outputs.forwarder;
    ForwarderConfig {
        url: forwarder.url.clone(),
        token: forwarder.token.clone().filter(|t| !t.is_empty()),
        index: forwarder.index.clone(),
        batch_size: forwarder.batch_size,
        max_buffered: forwarder.max_buffered,
        timeout: millis(forwarder.timeout_ms),
        ..ForwarderConfig::default()
    }
}

/// Directory the daemon writes to, for log messages.
pub fn data_dir(config: &VigilConfig) -> PathBuf {
    config.data_dir()
}
