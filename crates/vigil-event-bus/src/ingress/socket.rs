//! Unix domain socket ingress.
//!
//! External producers connect to a filesystem socket and write JSON. In
//! [`FramingMode::Single`] each connection carries one object; in
//! [`FramingMode::Lines`] it carries one object per line. A malformed message
//! closes its connection without affecting the listener.

use super::{EventSubmitter, IngressError};
use crate::shutdown::stopped;
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument};
use vigil_common_log::spans::connection_span;
use vigil_event_types::RawEvent;

/// Longest accepted socket path, in bytes. The kernel limit is 108.
const MAX_SOCKET_PATH: usize = 100;

/// How records are framed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// One JSON object per connection.
    #[default]
    Single,
    /// One JSON object per line, streaming.
    Lines,
}

/// Socket listener settings.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub path: PathBuf,
    pub mode: FramingMode,
    /// Close a connection after this long without data.
    pub idle_timeout: Duration,
    /// Largest accepted message or line.
    pub max_message_bytes: usize,
    /// Permission bits for the socket file.
    pub permissions: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/vigil.sock"),
            mode: FramingMode::Single,
            idle_timeout: Duration::from_secs(5),
            max_message_bytes: 64 * 1024,
            permissions: 0o666,
        }
    }
}

/// Removes the socket file when dropped.
#[derive(Debug)]
struct SocketCleanupGuard {
    path: PathBuf,
}

impl Drop for SocketCleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

fn validate_socket_path(path: &Path) -> Result<(), IngressError> {
    let invalid = |reason: &str| IngressError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let bytes = path.as_os_str().len();
    if bytes == 0 {
        return Err(invalid("path is empty"));
    }
    if bytes > MAX_SOCKET_PATH {
        return Err(invalid(&format!("{bytes} bytes exceeds {MAX_SOCKET_PATH}")));
    }
    Ok(())
}

/// Remove a socket file left behind by a previous run.
fn remove_stale_socket(path: &Path) -> Result<(), IngressError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %path.display(), "Removing stale socket");
            fs::remove_file(path).map_err(|source| IngressError::Bind {
                path: path.to_path_buf(),
                source,
            })
        }
        Ok(_) => Err(IngressError::InvalidPath {
            path: path.to_path_buf(),
            reason: "exists and is not a socket".to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(IngressError::Bind {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A bound Unix socket listener feeding the bus.
pub struct SocketIngress {
    listener: UnixListener,
    config: Arc<SocketConfig>,
    submitter: EventSubmitter,
    guard: SocketCleanupGuard,
}

impl SocketIngress {
    /// Bind the socket. Must be called inside a tokio runtime.
    pub fn bind(config: SocketConfig, submitter: EventSubmitter) -> Result<Self, IngressError> {
        let path = config.path.clone();
        validate_socket_path(&path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IngressError::Bind {
                path: path.clone(),
                source,
            })?;
        }
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|source| IngressError::Bind {
            path: path.clone(),
            source,
        })?;
        let guard = SocketCleanupGuard { path: path.clone() };

        fs::set_permissions(&path, fs::Permissions::from_mode(config.permissions)).map_err(
            |source| IngressError::Bind {
                path: path.clone(),
                source,
            },
        )?;

        info!(path = %path.display(), mode = ?config.mode, "Socket ingress listening");
        Ok(Self {
            listener,
            config: Arc::new(config),
            submitter,
            guard,
        })
    }

    /// Filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Accept connections until shutdown. The socket file is removed on return.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        next_id += 1;
                        let span = connection_span("unix", &format!("conn-{next_id}"));
                        let config = self.config.clone();
                        let submitter = self.submitter.clone();
                        let shutdown = shutdown.resubscribe();
                        tokio::spawn(
                            handle_connection(stream, config, submitter, shutdown).instrument(span),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept ingress connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        info!(path = %self.guard.path.display(), "Socket ingress stopped");
    }
}

async fn handle_connection(
    stream: UnixStream,
    config: Arc<SocketConfig>,
    submitter: EventSubmitter,
    mut shutdown: broadcast::Receiver<()>,
) {
    let served = tokio::select! {
        served = serve(stream, &config, &submitter) => served,
        _ = stopped(&mut shutdown) => return,
    };

    match served {
        Ok(events) => debug!(events, "Ingress connection closed"),
        Err(IngressError::Idle(after)) => debug!(?after, "Closing idle ingress connection"),
        Err(e) => {
            submitter.record_ingress_error();
            warn!(error = %e, "Closing ingress connection");
        }
    }
}

async fn serve(
    stream: UnixStream,
    config: &SocketConfig,
    submitter: &EventSubmitter,
) -> Result<usize, IngressError> {
    match config.mode {
        FramingMode::Single => serve_single(stream, config, submitter).await,
        FramingMode::Lines => serve_lines(stream, config, submitter).await,
    }
}

async fn serve_single(
    mut stream: UnixStream,
    config: &SocketConfig,
    submitter: &EventSubmitter,
) -> Result<usize, IngressError> {
    let mut message = Vec::new();
    let mut chunk = [0u8; 8 * 1024];

    loop {
        let read = tokio::time::timeout(config.idle_timeout, stream.read(&mut chunk))
            .await
            .map_err(|_| IngressError::Idle(config.idle_timeout))??;

        if read == 0 {
            // EOF: whatever arrived must be a complete object.
            let text = std::str::from_utf8(&message)?;
            if text.trim().is_empty() {
                return Ok(0);
            }
            submit_text(text, submitter)?;
            return Ok(1);
        }

        message.extend_from_slice(&chunk[..read]);
        if message.len() > config.max_message_bytes {
            return Err(IngressError::TooLarge {
                limit: config.max_message_bytes,
            });
        }

        // Producers that keep the connection open are served as soon as
        // the object is complete.
        match serde_json::from_slice::<serde_json::Value>(&message) {
            Ok(value) => {
                submit_value(value, submitter)?;
                return Ok(1);
            }
            Err(e) if e.is_eof() => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

async fn serve_lines(
    stream: UnixStream,
    config: &SocketConfig,
    submitter: &EventSubmitter,
) -> Result<usize, IngressError> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut events = 0;
    // One extra byte to tell an exactly-full line from an overlong one.
    let limit = config.max_message_bytes as u64 + 2;

    loop {
        line.clear();
        let read = tokio::time::timeout(
            config.idle_timeout,
            (&mut reader).take(limit).read_until(b'\n', &mut line),
        )
        .await
        .map_err(|_| IngressError::Idle(config.idle_timeout))??;

        if read == 0 {
            return Ok(events);
        }

        let text = std::str::from_utf8(&line)?.trim();
        if text.len() > config.max_message_bytes {
            return Err(IngressError::TooLarge {
                limit: config.max_message_bytes,
            });
        }
        if text.is_empty() {
            continue;
        }

        submit_text(text, submitter)?;
        events += 1;
    }
}

fn submit_text(text: &str, submitter: &EventSubmitter) -> Result<(), IngressError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    submit_value(value, submitter)
}

fn submit_value(value: serde_json::Value, submitter: &EventSubmitter) -> Result<(), IngressError> {
    let raw = RawEvent::try_from(value).map_err(|other| IngressError::NotAnObject(json_kind(&other)))?;
    submitter.submit(raw);
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Write a payload to an ingress socket and close the connection.
///
/// Used by the `submit` command and by tests; the payload is sent verbatim.
pub async fn send_payload(path: impl AsRef<Path>, payload: &[u8]) -> Result<(), IngressError> {
    let mut stream = UnixStream::connect(path.as_ref()).await?;
    stream.write_all(payload).await?;
    stream.shutdown().await?;
    Ok(())
}
