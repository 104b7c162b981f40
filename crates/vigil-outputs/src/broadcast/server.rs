//! WebSocket endpoint for broadcast subscribers.

use super::BroadcastHub;
use crate::OutputError;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn, Instrument};
use vigil_common_log::spans::connection_span;

/// Accepts WebSocket subscribers and streams hub messages to them.
///
/// The connection is read-only: anything a subscriber sends other than
/// close and ping frames is ignored.
pub struct BroadcastServer {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
}

impl BroadcastServer {
    /// Bind the listen address from the hub's configuration.
    pub async fn bind(hub: Arc<BroadcastHub>) -> Result<Self, OutputError> {
        let addr = hub.config().bind.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| OutputError::Bind { addr: addr.clone(), source })?;
        info!(addr = %addr, "Broadcast server listening");
        Ok(Self { listener, hub })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept subscribers until shutdown.
    ///
    /// Connected subscribers keep streaming after the accept loop ends and
    /// are released when the hub closes.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let span = connection_span("websocket", &peer.to_string());
                        tokio::spawn(serve_subscriber(stream, self.hub.clone()).instrument(span));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept subscriber");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        debug!("Broadcast server stopped accepting subscribers");
    }
}

async fn serve_subscriber(stream: TcpStream, hub: Arc<BroadcastHub>) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut outgoing, mut incoming) = socket.split();

    let Some(mut subscription) = hub.subscribe() else {
        let frame = CloseFrame {
            code: CloseCode::Again,
            reason: "subscriber limit reached".into(),
        };
        let _ = outgoing.send(Message::Close(Some(frame))).await;
        return;
    };
    let id = subscription.id;
    debug!(subscriber = id, "Subscriber connected");

    loop {
        tokio::select! {
            message = subscription.recv() => match message {
                Some(text) => {
                    if let Err(e) = outgoing.send(Message::Text(text.to_string())).await {
                        debug!(subscriber = id, error = %e, "Subscriber write failed");
                        break;
                    }
                }
                None => {
                    let _ = outgoing.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber = id, error = %e, "Subscriber read failed");
                    break;
                }
            },
        }
    }

    hub.unsubscribe(id);
    debug!(subscriber = id, "Subscriber disconnected");
}
