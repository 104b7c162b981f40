//! Daemon lifecycle.

use crate::settings;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_common_config::VigilConfig;
use vigil_event_bus::{EventBus, SocketIngress, StatsSnapshot};
use vigil_outputs::{BroadcastHub, BroadcastServer, BroadcastSink, ForwarderSink, LocalFileSink};

/// Run the bus until `signal` resolves, then shut down in order.
///
/// Failing to bind the ingress socket is fatal. An output that cannot be
/// constructed is logged and left out.
pub async fn run<F>(config: VigilConfig, signal: F) -> Result<StatsSnapshot>
where
    F: Future<Output = ()>,
{
    let bus = EventBus::new(settings::bus_config(&config)).context("failed to create event bus")?;
    info!(data_dir = %settings::data_dir(&config).display(), "Starting Vigil");

    let ingress = if config.ingress.enabled {
        let ingress = SocketIngress::bind(settings::socket_config(&config), bus.submitter())
            .context("failed to bind ingress socket")?;
        Some(ingress)
    } else {
        info!("Socket ingress disabled");
        None
    };

    let broadcast = register_outputs(&bus, &config).await;
    bus.start().await?;

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if let Some(ingress) = ingress {
        tasks.push(tokio::spawn(ingress.run(bus.shutdown_signal())));
    }
    if let Some(server) = broadcast {
        tasks.push(tokio::spawn(server.run(bus.shutdown_signal())));
    }

    signal.await;
    info!("Shutdown requested");
    bus.shutdown().await;

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Listener task ended abnormally");
        }
    }

    let stats = bus.stats().await;
    info!(
        received = stats.events_received,
        sent = stats.events_sent,
        dropped = stats.events_dropped,
        "Vigil stopped"
    );
    Ok(stats)
}

/// Register every enabled output. Returns the broadcast server to run.
async fn register_outputs(bus: &Arc<EventBus>, config: &VigilConfig) -> Option<BroadcastServer> {
    let outputs = &config.outputs;

    if outputs.local.enabled {
        match LocalFileSink::new(settings::local_config(config)) {
            Ok(sink) => bus.register_sink(Arc::new(sink)).await,
            Err(e) => warn!(error = %e, "Local output unavailable"),
        }
    }

    if outputs.forwarder.enabled {
        match ForwarderSink::new(settings::forwarder_config(config)) {
            Ok(sink) => bus.register_sink(Arc::new(sink)).await,
            Err(e) => warn!(error = %e, "Forwarder output unavailable"),
        }
    }

    if !outputs.broadcast.enabled {
        return None;
    }
    let hub = BroadcastHub::new(settings::broadcast_config(config));
    match BroadcastServer::bind(hub.clone()).await {
        Ok(server) => {
            bus.register_sink(Arc::new(BroadcastSink::new(hub))).await;
            Some(server)
        }
        Err(e) => {
            warn!(error = %e, "Broadcast output unavailable");
            None
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
