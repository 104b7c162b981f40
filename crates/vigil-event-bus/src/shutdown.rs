//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Fans a single stop request out to every long-running bus task.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    initiated: Arc<AtomicBool>,
    complete_tx: Arc<watch::Sender<bool>>,
    complete_rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        let (complete_tx, complete_rx) = watch::channel(false);

        Self {
            sender,
            initiated: Arc::new(AtomicBool::new(false)),
            complete_tx: Arc::new(complete_tx),
            complete_rx,
        }
    }

    /// Subscribe to the stop signal.
    ///
    /// A receiver taken after shutdown began is already closed, so
    /// [`stopped`] resolves at once for it.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        let receiver = self.sender.subscribe();
        // Checked after subscribing: a later `initiate` still reaches us.
        if self.is_shutting_down() {
            let (_, closed) = broadcast::channel(1);
            return closed;
        }
        receiver
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Returns `false` if it was already initiated.
    pub fn initiate(&self) -> bool {
        if self.initiated.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("Initiating graceful shutdown");
        let _ = self.sender.send(());
        true
    }

    /// Wait until [`complete`](Self::complete) has been called.
    pub async fn wait_for_completion(&self) {
        let mut rx = self.complete_rx.clone();
        let _ = rx.wait_for(|&complete| complete).await;
    }

    /// Mark shutdown as complete.
    pub fn complete(&self) {
        info!("Shutdown complete");
        let _ = self.complete_tx.send(true);
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once `shutdown` fires or its sender is gone.
pub(crate) async fn stopped(shutdown: &mut broadcast::Receiver<()>) {
    // Lagged and Closed both mean the signal is gone for good.
    let _ = shutdown.recv().await;
}
