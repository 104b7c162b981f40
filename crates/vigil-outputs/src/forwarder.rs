//! Remote forwarder for HTTP Event Collector endpoints.

use crate::OutputError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vigil_event_bus::{EventBatch, Sink, SinkError};
use vigil_event_types::Event;

const COLLECTOR_PATH: &str = "/services/collector/event";

/// Forwarder settings.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Collector base URL, e.g. `https://collector.example.com:8088`.
    pub url: String,
    /// Sent as `Authorization: Splunk <token>` when set.
    pub token: Option<String>,
    pub index: String,
    /// Host name reported with every event.
    pub host: String,
    /// Events accumulated before a request is sent.
    pub batch_size: usize,
    /// Events kept for retry; the oldest are dropped beyond this.
    pub max_buffered: usize,
    pub timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            index: "vigil".to_string(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            batch_size: 100,
            max_buffered: 10_000,
            timeout: Duration::from_secs(10),
        }
    }
}

/// One collector record.
#[derive(Debug, Serialize)]
struct CollectorRecord {
    /// Seconds since the epoch.
    time: f64,
    host: String,
    source: String,
    sourcetype: String,
    index: String,
    event: Arc<Event>,
}

/// Accumulates events and posts them to `<url>/services/collector/event`.
///
/// A failed request keeps its events buffered for the next attempt; the
/// failure is still reported to the fan-out registry.
pub struct ForwarderSink {
    client: Client,
    endpoint: String,
    config: ForwarderConfig,
    buffer: Mutex<VecDeque<Arc<Event>>>,
}

impl ForwarderSink {
    pub fn new(config: ForwarderConfig) -> Result<Self, OutputError> {
        if config.url.trim().is_empty() {
            return Err(OutputError::InvalidConfig("forwarder url is empty".into()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("vigil/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let endpoint = format!("{}{COLLECTOR_PATH}", config.url.trim_end_matches('/'));
        info!(endpoint = %endpoint, index = %config.index, "Forwarder ready");

        Ok(Self {
            client,
            endpoint,
            config,
            buffer: Mutex::new(VecDeque::new()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Events waiting to be sent.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    fn record(&self, event: Arc<Event>) -> CollectorRecord {
        let time = event
            .timestamp
            .parsed()
            .unwrap_or_else(Utc::now)
            .timestamp_millis() as f64
            / 1000.0;
        CollectorRecord {
            time,
            host: self.config.host.clone(),
            source: event.source.clone(),
            sourcetype: format!("vigil:{}", event.event_type),
            index: self.config.index.clone(),
            event,
        }
    }

    /// Post everything buffered. The buffer is cleared only on success.
    async fn send(&self, buffer: &mut VecDeque<Arc<Event>>) -> Result<(), SinkError> {
        if buffer.is_empty() {
            return Ok(());
        }
        let records: Vec<CollectorRecord> = buffer.iter().cloned().map(|e| self.record(e)).collect();

        let mut request = self.client.post(&self.endpoint).json(&records);
        if let Some(token) = &self.config.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Splunk {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(events = records.len(), "Forwarded events");
        buffer.clear();
        Ok(())
    }
}

#[async_trait]
impl Sink for ForwarderSink {
    fn name(&self) -> &str {
        "forwarder"
    }

    async fn accept(&self, batch: Arc<EventBatch>) -> Result<(), SinkError> {
        let mut buffer = self.buffer.lock().await;
        buffer.extend(batch.iter().cloned().map(Arc::new));

        let overflow = buffer.len().saturating_sub(self.config.max_buffered);
        if overflow > 0 {
            buffer.drain(..overflow);
            warn!(dropped = overflow, "Forwarder buffer full, dropped oldest events");
        }

        if buffer.len() >= self.config.batch_size.max(1) {
            self.send(&mut buffer).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut buffer = self.buffer.lock().await;
        let pending = buffer.len();
        self.send(&mut buffer).await?;
        if pending > 0 {
            info!(events = pending, "Flushed forwarder buffer");
        }
        Ok(())
    }
}
