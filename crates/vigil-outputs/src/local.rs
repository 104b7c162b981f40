//! Durable local sink: one JSON object per line, rotated by size.

use crate::OutputError;
use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use vigil_event_bus::{EventBatch, Sink, SinkError};

/// Local file sink settings.
#[derive(Debug, Clone)]
pub struct LocalFileConfig {
    /// Directory the event files are written to.
    pub dir: PathBuf,
    /// Rotate before a write would take a file past this many bytes.
    pub max_file_size: u64,
}

impl LocalFileConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

struct ActiveFile {
    path: PathBuf,
    file: File,
    size: u64,
}

/// Appends every delivered event to `events_YYYYMMDD_HHMMSS_ffffff.jsonl`
/// files named by UTC creation time.
///
/// Each file stays at or below `max_file_size` unless a single line is
/// larger than the limit, in which case that line gets a file of its own.
pub struct LocalFileSink {
    config: LocalFileConfig,
    active: Mutex<Option<ActiveFile>>,
}

impl LocalFileSink {
    /// Create the output directory. The first file is opened on first write.
    pub fn new(config: LocalFileConfig) -> Result<Self, OutputError> {
        std::fs::create_dir_all(&config.dir).map_err(|source| OutputError::Io {
            path: config.dir.clone(),
            source,
        })?;
        info!(dir = %config.dir.display(), max_file_size = config.max_file_size, "Local output ready");

        Ok(Self {
            config,
            active: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Path of the file currently being appended to.
    pub async fn current_file(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|a| a.path.clone())
    }

    async fn open_next(&self) -> io::Result<ActiveFile> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("events_{stamp}.jsonl"),
                n => format!("events_{stamp}_{n}.jsonl"),
            };
            let path = self.config.dir.join(name);
            match OpenOptions::new()
                .append(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(path = %path.display(), "Opened local event file");
                    return Ok(ActiveFile { path, file, size: 0 });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_lines(&self, lines: Vec<Vec<u8>>) -> io::Result<()> {
        let mut active = self.active.lock().await;
        let mut pending: Vec<u8> = Vec::new();

        for line in lines {
            let len = line.len() as u64;
            let rotate = match active.as_ref() {
                None => true,
                Some(file) => {
                    let used = file.size + pending.len() as u64;
                    used > 0 && used + len > self.config.max_file_size
                }
            };

            if rotate {
                if let Some(file) = active.as_mut() {
                    flush_pending(file, &mut pending).await?;
                }
                *active = Some(self.open_next().await?);
            }
            pending.extend_from_slice(&line);
        }

        if let Some(file) = active.as_mut() {
            flush_pending(file, &mut pending).await?;
        }
        Ok(())
    }
}

async fn flush_pending(file: &mut ActiveFile, pending: &mut Vec<u8>) -> io::Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    file.file.write_all(pending).await?;
    file.file.flush().await?;
    file.size += pending.len() as u64;
    pending.clear();
    Ok(())
}

#[async_trait]
impl Sink for LocalFileSink {
    fn name(&self) -> &str {
        "local"
    }

    async fn accept(&self, batch: Arc<EventBatch>) -> Result<(), SinkError> {
        let lines = batch
            .iter()
            .map(|event| {
                let mut line = serde_json::to_vec(event)?;
                line.push(b'\n');
                Ok(line)
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        self.write_lines(lines).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        if let Some(mut active) = self.active.lock().await.take() {
            active.file.sync_all().await?;
            debug!(path = %active.path.display(), bytes = active.size, "Closed local event file");
        }
        Ok(())
    }
}
