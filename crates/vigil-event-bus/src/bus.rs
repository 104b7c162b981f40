//! The event bus: wiring and lifecycle.

use crate::batch::{batch_processing_loop, BatchConfig, EventBatch};
use crate::dedup::DedupFilter;
use crate::fanout::{Sink, SinkRegistry, DEFAULT_SINK_QUEUE};
use crate::ingress::{EventSubmitter, Intake};
use crate::overflow::{OverflowBuffer, OverflowError, ReplayConfig, Replayer};
use crate::queue::EventQueue;
use crate::shutdown::{stopped, ShutdownCoordinator};
use crate::stats::{BusStats, StatsSnapshot};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use vigil_common_log::spans::{batch_span, Timer};
use vigil_event_types::{Event, RawEvent};

/// Event bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("overflow buffer unavailable: {0}")]
    Overflow(#[from] OverflowError),

    #[error("event bus already started")]
    AlreadyStarted,

    #[error("event bus is shutting down")]
    ShuttingDown,
}

/// Event bus settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// In-memory queue capacity.
    pub queue_capacity: usize,
    /// Duplicate suppression window; `None` disables dedup.
    pub dedup_window: Option<Duration>,
    pub batch: BatchConfig,
    /// Batches waiting for the dispatcher before the scheduler blocks.
    pub max_in_flight: usize,
    /// Batches each sink may have waiting; a sink that falls further behind
    /// misses batches.
    pub sink_queue: usize,
    /// Per-sink delivery timeout.
    pub sink_timeout: Duration,
    /// Overflow segment directory.
    pub overflow_dir: PathBuf,
    pub replay: ReplayConfig,
    /// Interval between statistics log lines; `None` disables them.
    pub stats_interval: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            dedup_window: Some(Duration::from_secs(5)),
            batch: BatchConfig::default(),
            max_in_flight: 8,
            sink_queue: DEFAULT_SINK_QUEUE,
            sink_timeout: Duration::from_secs(30),
            overflow_dir: std::env::temp_dir().join("vigil").join("event_buffer"),
            replay: ReplayConfig::default(),
            stats_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl BusConfig {
    /// Default settings with the overflow buffer in `dir`.
    pub fn with_overflow_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            overflow_dir: dir.into(),
            ..Self::default()
        }
    }
}

struct BusTasks {
    scheduler: JoinHandle<()>,
    dispatcher: JoinHandle<u64>,
    replayer: JoinHandle<()>,
    reporter: Option<JoinHandle<()>>,
    background_stop: broadcast::Sender<()>,
}

/// Host-local event bus.
///
/// Producers submit through [`EventBus::submit`] or a cloned
/// [`EventSubmitter`]; events are normalized, deduplicated, queued (or
/// spilled to disk), batched, and offered to every registered [`Sink`].
pub struct EventBus {
    config: BusConfig,
    intake: Arc<Intake>,
    registry: Arc<SinkRegistry>,
    stats: Arc<BusStats>,
    shutdown: ShutdownCoordinator,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    tasks: tokio::sync::Mutex<Option<BusTasks>>,
}

impl EventBus {
    /// Create a bus. Nothing runs until [`start`](Self::start).
    pub fn new(config: BusConfig) -> Result<Arc<Self>, BusError> {
        let overflow = Arc::new(OverflowBuffer::open(&config.overflow_dir)?);
        let (queue, receiver) = EventQueue::new(config.queue_capacity);
        let stats = Arc::new(BusStats::new());

        let intake = Arc::new(Intake {
            queue,
            overflow,
            dedup: config.dedup_window.map(DedupFilter::new),
            stats: stats.clone(),
        });

        Ok(Arc::new(Self {
            registry: Arc::new(SinkRegistry::with_queue_capacity(
                config.sink_timeout,
                config.sink_queue,
            )),
            config,
            intake,
            stats,
            shutdown: ShutdownCoordinator::new(),
            receiver: Mutex::new(Some(receiver)),
            tasks: tokio::sync::Mutex::new(None),
        }))
    }

    /// Submit a raw event. Never blocks and never fails.
    pub fn submit(&self, raw: RawEvent) {
        self.intake.submit(raw);
    }

    /// A cloneable submission handle for collectors and ingress adapters.
    pub fn submitter(&self) -> EventSubmitter {
        EventSubmitter::new(self.intake.clone())
    }

    /// Register an output sink.
    pub async fn register_sink(&self, sink: Arc<dyn Sink>) {
        info!(sink = sink.name(), "Output sink registered");
        self.registry.register(sink).await;
    }

    /// The fan-out registry.
    pub fn registry(&self) -> &Arc<SinkRegistry> {
        &self.registry
    }

    /// Subscribe to the bus's stop signal (for ingress adapters).
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Current statistics.
    pub async fn stats(&self) -> StatsSnapshot {
        snapshot(&self.stats, &self.intake, &self.registry).await
    }

    /// Spawn the scheduler, dispatcher, replayer and reporter.
    pub async fn start(&self) -> Result<(), BusError> {
        if self.shutdown.is_shutting_down() {
            return Err(BusError::ShuttingDown);
        }
        let receiver = self.receiver.lock().take().ok_or(BusError::AlreadyStarted)?;
        let (batch_tx, batch_rx) = mpsc::channel(self.config.max_in_flight.max(1));
        let (background_stop, _) = broadcast::channel(1);

        let scheduler = tokio::spawn(batch_processing_loop(
            receiver,
            batch_tx,
            self.config.batch.clone(),
            self.shutdown.subscribe(),
        ));

        let dispatcher = tokio::spawn(dispatch_loop(
            batch_rx,
            self.registry.clone(),
            self.intake.clone(),
            self.shutdown.clone(),
        ));

        let replayer = Replayer::new(
            self.intake.overflow.clone(),
            self.intake.queue.clone(),
            self.stats.clone(),
            self.config.replay.clone(),
        )
        .with_registry(self.registry.clone());
        let replayer = tokio::spawn(replayer.run(background_stop.subscribe()));

        let reporter = self.config.stats_interval.map(|every| {
            tokio::spawn(report_loop(
                every,
                self.stats.clone(),
                self.intake.clone(),
                self.registry.clone(),
                background_stop.subscribe(),
            ))
        });

        *self.tasks.lock().await = Some(BusTasks {
            scheduler,
            dispatcher,
            replayer,
            reporter,
            background_stop,
        });

        let sinks = self.registry.len().await;
        info!(
            queue_capacity = self.config.queue_capacity,
            max_batch_size = self.config.batch.max_batch_size,
            sinks,
            "Event bus started"
        );
        Ok(())
    }

    /// Stop the bus without losing queued events.
    ///
    /// Ingress stops first and the queue is closed and drained into final
    /// batches. Once every batch has been dispatched the replayer stops,
    /// any remaining overflow segments are delivered straight to the sinks,
    /// and finally the sinks finish their queues and are closed. With no
    /// sinks registered, drained events are kept in the overflow buffer for
    /// the next run.
    pub async fn shutdown(&self) {
        if !self.shutdown.initiate() {
            self.shutdown.wait_for_completion().await;
            return;
        }
        let timer = Timer::start("event bus shutdown");

        let mut next_batch_id = 0;
        let tasks = self.tasks.lock().await.take();
        match tasks {
            Some(tasks) => {
                if let Err(e) = tasks.scheduler.await {
                    warn!(error = %e, "Batch scheduler ended abnormally");
                }
                match tasks.dispatcher.await {
                    Ok(last) => next_batch_id = last + 1,
                    Err(e) => warn!(error = %e, "Dispatcher ended abnormally"),
                }
                let _ = tasks.background_stop.send(());
                let _ = tasks.replayer.await;
                if let Some(reporter) = tasks.reporter {
                    let _ = reporter.await;
                }
            }
            None => {
                // Never started: whatever was queued is batched here.
                let receiver = self.receiver.lock().take();
                if let Some(mut receiver) = receiver {
                    receiver.close();
                    let mut pending = Vec::new();
                    while let Ok(event) = receiver.try_recv() {
                        pending.push(event);
                    }
                    next_batch_id = self.deliver_direct(pending, 1).await;
                }
            }
        }

        self.flush_overflow(next_batch_id.max(1)).await;
        self.registry.close_all().await;

        let stats = self.stats().await;
        info!(
            received = stats.events_received,
            sent = stats.events_sent,
            dropped = stats.events_dropped,
            buffer_files = stats.buffer_files,
            "Event bus stopped"
        );
        timer.finish();
        self.shutdown.complete();
    }

    /// Deliver every overflow segment straight to the registry.
    async fn flush_overflow(&self, mut next_batch_id: u64) {
        if self.registry.is_empty().await {
            debug!("No sinks registered; leaving overflow segments on disk");
            return;
        }

        let overflow = &self.intake.overflow;
        let segments = match overflow.take_sealed(usize::MAX) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(error = %e, "Failed to list overflow segments for final flush");
                return;
            }
        };

        for path in segments {
            let read = match OverflowBuffer::read_segment(&path) {
                Ok(read) => read,
                Err(e) => {
                    warn!(error = %e, "Leaving unreadable overflow segment on disk");
                    continue;
                }
            };
            self.stats.events_dropped.inc_by(read.corrupt);
            self.stats.events_replayed.inc_by(read.events.len() as u64);
            next_batch_id = self.deliver_direct(read.events, next_batch_id).await;

            if let Err(e) = OverflowBuffer::remove_segment(&path) {
                warn!(error = %e, "Failed to delete flushed overflow segment");
            }
        }
    }

    /// Dispatch events in `max_batch_size` chunks, bypassing the queue.
    /// Returns the next unused batch id.
    async fn deliver_direct(&self, events: Vec<Event>, mut next_batch_id: u64) -> u64 {
        let size = self.config.batch.max_batch_size.max(1);
        let mut events = events.into_iter().peekable();
        while events.peek().is_some() {
            let chunk: Vec<Event> = events.by_ref().take(size).collect();
            let batch = EventBatch::new(next_batch_id, chunk);
            next_batch_id += 1;
            deliver(&self.registry, &self.intake, batch, Handoff::Wait).await;
        }
        next_batch_id
    }
}

/// How a batch is handed to the sink queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handoff {
    /// Never wait; a sink with a full queue misses the batch.
    Immediate,
    /// Wait for room, bounded by the sink timeout.
    Wait,
}

async fn deliver(registry: &SinkRegistry, intake: &Intake, batch: EventBatch, handoff: Handoff) {
    let span = batch_span(batch.id, batch.len());
    async {
        if registry.is_empty().await {
            debug!("No sinks registered; keeping batch in the overflow buffer");
            intake.park(&batch.events);
            return;
        }

        let stats = &intake.stats;
        stats.batches_dispatched.inc();
        stats.events_sent.inc_by(batch.len() as u64);
        let batch = Arc::new(batch);
        let report = match handoff {
            Handoff::Immediate => registry.dispatch(batch).await,
            Handoff::Wait => registry.dispatch_waiting(batch).await,
        };
        debug!(queued = report.queued, rejected = report.rejected, "Batch dispatched");
    }
    .instrument(span)
    .await
}

/// Hand batches to the sink queues one at a time, in formation order.
/// Batches drained during shutdown wait for room in the sink queues.
/// Returns the id of the last batch seen.
async fn dispatch_loop(
    mut batches: mpsc::Receiver<EventBatch>,
    registry: Arc<SinkRegistry>,
    intake: Arc<Intake>,
    shutdown: ShutdownCoordinator,
) -> u64 {
    let mut last_id = 0;
    while let Some(batch) = batches.recv().await {
        last_id = batch.id;
        let handoff = if shutdown.is_shutting_down() {
            Handoff::Wait
        } else {
            Handoff::Immediate
        };
        deliver(&registry, &intake, batch, handoff).await;
    }
    debug!("Dispatcher stopped");
    last_id
}

async fn snapshot(stats: &BusStats, intake: &Intake, registry: &SinkRegistry) -> StatsSnapshot {
    StatsSnapshot::capture(
        stats,
        intake.queue.len(),
        intake.overflow.segment_count(),
        registry.snapshot().await,
    )
}

async fn report_loop(
    every: Duration,
    stats: Arc<BusStats>,
    intake: Arc<Intake>,
    registry: Arc<SinkRegistry>,
    mut stop: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                let snapshot = snapshot(&stats, &intake, &registry).await;
                info!(
                    received = snapshot.events_received,
                    sent = snapshot.events_sent,
                    dropped = snapshot.events_dropped,
                    suppressed = snapshot.events_suppressed,
                    buffered = snapshot.events_buffered,
                    queue_size = snapshot.queue_size,
                    buffer_files = snapshot.buffer_files,
                    "Event bus statistics"
                );
            }
        }
    }
}
