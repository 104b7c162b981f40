//! Output fan-out.
//!
//! Every registered [`Sink`] gets its own worker task fed by a bounded queue
//! of batches. Dispatch only enqueues, so a slow, hung or failing sink falls
//! behind on its own while the others keep up. Each delivery runs under a
//! timeout in a separate task, which contains panics to that one batch.

use crate::batch::EventBatch;
use crate::stats::{Counter, SinkStatsSnapshot};
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};
use vigil_common_log::spans::sink_span;

/// Batches a sink may have waiting before it starts missing them.
pub const DEFAULT_SINK_QUEUE: usize = 256;

/// Sink delivery errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("sink is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// A consumer of event batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs and statistics.
    fn name(&self) -> &str;

    /// Deliver one batch. Sinks own any retry policy.
    async fn accept(&self, batch: Arc<EventBatch>) -> Result<(), SinkError>;

    /// Flush and release resources.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SinkStats {
    delivered: Counter,
    failed: Counter,
    last_error: Mutex<Option<String>>,
    /// Set when a waiting hand-off timed out; cleared by the next success.
    stalled: AtomicBool,
}

impl SinkStats {
    fn record_failure(&self, sink: &str, batch: &EventBatch, error: String) {
        warn!(
            sink = sink,
            batch = batch.id,
            events = batch.len(),
            error = %error,
            "Sink delivery failed"
        );
        self.failed.inc();
        *self.last_error.lock() = Some(error);
    }
}

struct RegisteredSink {
    sink: Arc<dyn Sink>,
    stats: Arc<SinkStats>,
    /// Taken on close so the worker drains and exits.
    queue: Mutex<Option<mpsc::Sender<Arc<EventBatch>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RegisteredSink {
    fn sender(&self) -> Option<mpsc::Sender<Arc<EventBatch>>> {
        self.queue.lock().clone()
    }
}

/// Result of offering one batch to every sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sinks whose worker took the batch.
    pub queued: usize,
    /// Sinks that missed the batch because their queue was full or closed.
    pub rejected: usize,
}

/// The set of registered sinks.
pub struct SinkRegistry {
    sinks: RwLock<Vec<Arc<RegisteredSink>>>,
    timeout: Duration,
    queue_capacity: usize,
}

impl SinkRegistry {
    /// Create an empty registry with a per-sink delivery timeout.
    pub fn new(timeout: Duration) -> Self {
        Self::with_queue_capacity(timeout, DEFAULT_SINK_QUEUE)
    }

    /// Create an empty registry whose sinks each buffer up to `capacity` batches.
    pub fn with_queue_capacity(timeout: Duration, capacity: usize) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            timeout,
            queue_capacity: capacity.max(1),
        }
    }

    /// Add a sink and start its worker. Must be called inside a tokio runtime.
    pub async fn register(&self, sink: Arc<dyn Sink>) {
        let stats = Arc::new(SinkStats::default());
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(sink_worker(sink.clone(), stats.clone(), rx, self.timeout));

        debug!(sink = sink.name(), queue = self.queue_capacity, "Registered sink");
        self.sinks.write().await.push(Arc::new(RegisteredSink {
            sink,
            stats,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }));
    }

    /// Number of registered sinks.
    pub async fn len(&self) -> usize {
        self.sinks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Names of registered sinks, in registration order.
    pub async fn names(&self) -> Vec<String> {
        self.sinks
            .read()
            .await
            .iter()
            .map(|s| s.sink.name().to_string())
            .collect()
    }

    /// Queue a batch for every sink without waiting.
    ///
    /// A sink whose queue is full misses this batch; the miss is counted as
    /// a failure for that sink alone.
    pub async fn dispatch(&self, batch: Arc<EventBatch>) -> DispatchReport {
        let sinks = self.sinks.read().await.clone();
        let mut report = DispatchReport::default();

        for registered in &sinks {
            let outcome = match registered.sender() {
                Some(tx) => offer(&tx, batch.clone()),
                None => Err(SinkError::Closed.to_string()),
            };
            report.record(registered, &batch, outcome);
        }
        report
    }

    /// Queue a batch for every sink, waiting up to the delivery timeout for
    /// room in each queue. Used while draining at shutdown.
    ///
    /// A sink whose wait once timed out is not waited for again until it
    /// delivers a batch, so a hung sink costs one timeout per drain.
    pub async fn dispatch_waiting(&self, batch: Arc<EventBatch>) -> DispatchReport {
        let sinks = self.sinks.read().await.clone();
        let timeout = self.timeout;

        let sends = sinks.iter().map(|registered| {
            let batch = batch.clone();
            async move {
                let Some(tx) = registered.sender() else {
                    return Err(SinkError::Closed.to_string());
                };
                if registered.stats.stalled.load(Ordering::SeqCst) {
                    return offer(&tx, batch);
                }
                tx.send_timeout(batch, timeout).await.map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => {
                        registered.stats.stalled.store(true, Ordering::SeqCst);
                        format!("delivery queue still full after {timeout:?}")
                    }
                    SendTimeoutError::Closed(_) => "sink worker stopped".to_string(),
                })
            }
        });
        let outcomes = join_all(sends).await;

        let mut report = DispatchReport::default();
        for (registered, outcome) in sinks.iter().zip(outcomes) {
            report.record(registered, &batch, outcome);
        }
        report
    }

    /// Let every sink finish its queued batches, then close it.
    ///
    /// Sinks are closed concurrently, so one slow sink does not hold up the
    /// others.
    pub async fn close_all(&self) {
        let sinks = self.sinks.read().await.clone();
        join_all(sinks.iter().map(|registered| self.close_one(registered))).await;
    }

    async fn close_one(&self, registered: &RegisteredSink) {
        let name = registered.sink.name();
        drop(registered.queue.lock().take());

        let worker = registered.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(sink = %name, error = %e, "Sink worker ended abnormally");
            }
        }

        match tokio::time::timeout(self.timeout, registered.sink.close()).await {
            Ok(Ok(())) => debug!(sink = %name, "Closed sink"),
            Ok(Err(e)) => warn!(sink = %name, error = %e, "Sink close failed"),
            Err(_) => warn!(sink = %name, "Sink close timed out"),
        }
    }

    /// Per-sink counters, in registration order.
    pub async fn snapshot(&self) -> Vec<SinkStatsSnapshot> {
        self.sinks
            .read()
            .await
            .iter()
            .map(|registered| SinkStatsSnapshot {
                name: registered.sink.name().to_string(),
                delivered_batches: registered.stats.delivered.get(),
                failed_batches: registered.stats.failed.get(),
                last_error: registered.stats.last_error.lock().clone(),
            })
            .collect()
    }
}

impl DispatchReport {
    fn record(&mut self, registered: &RegisteredSink, batch: &EventBatch, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => self.queued += 1,
            Err(error) => {
                registered
                    .stats
                    .record_failure(registered.sink.name(), batch, error);
                self.rejected += 1;
            }
        }
    }
}

fn offer(tx: &mpsc::Sender<Arc<EventBatch>>, batch: Arc<EventBatch>) -> Result<(), String> {
    tx.try_send(batch).map_err(|e| match e {
        TrySendError::Full(_) => "delivery queue full, batch skipped".to_string(),
        TrySendError::Closed(_) => "sink worker stopped".to_string(),
    })
}

/// Deliver queued batches to one sink, in order, until its queue closes.
async fn sink_worker(
    sink: Arc<dyn Sink>,
    stats: Arc<SinkStats>,
    mut batches: mpsc::Receiver<Arc<EventBatch>>,
    timeout: Duration,
) {
    while let Some(batch) = batches.recv().await {
        let span = sink_span(sink.name(), batch.id);
        let delivery = {
            let sink = sink.clone();
            let batch = batch.clone();
            tokio::spawn(
                async move { tokio::time::timeout(timeout, sink.accept(batch)).await }
                    .instrument(span),
            )
        };

        let error = match delivery.await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(_elapsed)) => Some(format!("timed out after {timeout:?}")),
            Err(join) if join.is_panic() => Some("panicked during delivery".to_string()),
            Err(join) => Some(join.to_string()),
        };
        match error {
            None => {
                stats.delivered.inc();
                stats.stalled.store(false, Ordering::SeqCst);
            }
            Some(error) => stats.record_failure(sink.name(), &batch, error),
        }
    }
    debug!(sink = sink.name(), "Sink worker stopped");
}
