//! Disk overflow buffer and replayer.
//!
//! When the in-memory queue is full, events are appended to gzip segment
//! files under the buffer directory. Each append writes a complete gzip
//! member, so a crash can at worst lose the member being written. The
//! [`Replayer`] periodically reads sealed segments back, oldest first, and
//! feeds them into the queue again.

use crate::fanout::SinkRegistry;
use crate::queue::EventQueue;
use crate::stats::BusStats;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use vigil_event_types::Event;

const SEGMENT_PREFIX: &str = "overflow_";
const SEGMENT_SUFFIX: &str = ".jsonl.gz";

/// Events written to one segment before a new one is started.
pub const DEFAULT_SEGMENT_EVENTS: usize = 1_000;

/// Minimum spacing between logged write failures.
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Overflow buffer errors.
#[derive(Debug, Error)]
pub enum OverflowError {
    #[error("overflow I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl OverflowError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

struct ActiveSegment {
    path: PathBuf,
    file: File,
    events: usize,
}

#[derive(Default)]
struct SegmentState {
    active: Option<ActiveSegment>,
    seq: u64,
}

/// Logs at most once per interval, remembering how many repeats it swallowed.
#[derive(Debug)]
pub(crate) struct ErrorThrottle {
    interval: Duration,
    last_logged: Option<Instant>,
    suppressed: u64,
}

impl ErrorThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: None,
            suppressed: 0,
        }
    }

    /// Returns the number of swallowed repeats when this occurrence should be
    /// logged, or `None` when it should be swallowed.
    pub(crate) fn check(&mut self, now: Instant) -> Option<u64> {
        match self.last_logged {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last_logged = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }
}

/// Result of reading one segment.
#[derive(Debug, Default)]
pub struct SegmentRead {
    /// Events in file order.
    pub events: Vec<Event>,
    /// Lines (or trailing data) that could not be decoded.
    pub corrupt: u64,
}

/// Append-only gzip segment store for events that did not fit in memory.
pub struct OverflowBuffer {
    dir: PathBuf,
    state: Mutex<SegmentState>,
    max_segment_events: usize,
    failures: Mutex<ErrorThrottle>,
}

impl OverflowBuffer {
    /// Open (creating if needed) the buffer directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, OverflowError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| OverflowError::io(&dir, e))?;

        Ok(Self {
            dir,
            state: Mutex::new(SegmentState::default()),
            max_segment_events: DEFAULT_SEGMENT_EVENTS,
            failures: Mutex::new(ErrorThrottle::new(FAILURE_LOG_INTERVAL)),
        })
    }

    /// Roll to a new segment after this many events.
    pub fn with_segment_limit(mut self, events: usize) -> Self {
        self.max_segment_events = events.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one event as its own gzip member.
    pub fn append(&self, event: &Event) -> Result<(), OverflowError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let member = gzip_member(&line).map_err(|e| OverflowError::io(&self.dir, e))?;

        let mut state = self.state.lock();
        let needs_roll = state
            .active
            .as_ref()
            .map_or(true, |active| active.events >= self.max_segment_events);
        if needs_roll {
            let segment = self.create_segment(&mut state.seq)?;
            debug!(path = %segment.path.display(), "Opened overflow segment");
            state.active = Some(segment);
        }

        let Some(active) = state.active.as_mut() else {
            return Ok(());
        };
        let written = active
            .file
            .write_all(&member)
            .and_then(|()| active.file.flush());
        if let Err(e) = written {
            let path = active.path.clone();
            // A half-written member would poison the rest of the segment.
            state.active = None;
            return Err(OverflowError::io(&path, e));
        }
        active.events += 1;
        Ok(())
    }

    fn create_segment(&self, seq: &mut u64) -> Result<ActiveSegment, OverflowError> {
        let millis = chrono::Utc::now().timestamp_millis().max(0);
        loop {
            *seq += 1;
            let path = self
                .dir
                .join(format!("{SEGMENT_PREFIX}{millis:013}_{seq:06}{SEGMENT_SUFFIX}", seq = *seq));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(ActiveSegment {
                        path,
                        file,
                        events: 0,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(OverflowError::io(&path, e)),
            }
        }
    }

    /// Close the active segment so it can be read back.
    pub fn seal(&self) {
        if let Some(active) = self.state.lock().active.take() {
            debug!(path = %active.path.display(), events = active.events, "Sealed overflow segment");
        }
    }

    /// All segment files, oldest first.
    pub fn segments(&self) -> Result<Vec<PathBuf>, OverflowError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| OverflowError::io(&self.dir, e))?;
        let mut segments: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_segment(path))
            .collect();
        segments.sort();
        Ok(segments)
    }

    /// Number of segment files on disk.
    pub fn segment_count(&self) -> usize {
        self.segments().map(|s| s.len()).unwrap_or(0)
    }

    /// Seal the active segment and list up to `limit` segments, oldest first.
    ///
    /// Listing happens under the segment lock, so a segment created by a
    /// concurrent append is never returned while it is still being written.
    pub fn take_sealed(&self, limit: usize) -> Result<Vec<PathBuf>, OverflowError> {
        let mut state = self.state.lock();
        state.active = None;
        let mut segments = self.segments()?;
        segments.truncate(limit);
        Ok(segments)
    }

    /// Decode a segment. Undecodable lines are counted and skipped.
    pub fn read_segment(path: &Path) -> Result<SegmentRead, OverflowError> {
        let file = File::open(path).map_err(|e| OverflowError::io(path, e))?;
        let is_file = file
            .metadata()
            .map_err(|e| OverflowError::io(path, e))?
            .is_file();
        if !is_file {
            let e = io::Error::new(io::ErrorKind::InvalidInput, "not a regular file");
            return Err(OverflowError::io(path, e));
        }
        let reader = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
        let mut read = SegmentRead::default();

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    // Truncated trailing member; everything before it is intact.
                    warn!(path = %path.display(), error = %e, "Overflow segment ends with undecodable data");
                    read.corrupt += 1;
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => read.events.push(event),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupt overflow record");
                    read.corrupt += 1;
                }
            }
        }

        Ok(read)
    }

    /// Replace a segment's contents with `events`, atomically.
    pub fn rewrite_segment(path: &Path, events: &[Event]) -> Result<(), OverflowError> {
        let mut body = Vec::new();
        for event in events {
            serde_json::to_writer(&mut body, event)?;
            body.push(b'\n');
        }
        let member = gzip_member(&body).map_err(|e| OverflowError::io(path, e))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, member).map_err(|e| OverflowError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| OverflowError::io(path, e))
    }

    /// Delete a fully replayed segment.
    pub fn remove_segment(path: &Path) -> Result<(), OverflowError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OverflowError::io(path, e)),
        }
    }

    /// Log a lost event, rate-limited.
    pub fn report_write_failure(&self, event: &Event, err: &OverflowError) {
        if let Some(suppressed) = self.failures.lock().check(Instant::now()) {
            error!(
                event_id = %event.id,
                error = %err,
                suppressed_since_last = suppressed,
                "Event dropped: overflow buffer write failed"
            );
        }
    }
}

impl Drop for OverflowBuffer {
    fn drop(&mut self) {
        self.seal();
    }
}

fn is_segment(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.starts_with(SEGMENT_PREFIX) && name.ends_with(SEGMENT_SUFFIX))
}

fn gzip_member(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Replayer scheduling.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Time between passes.
    pub interval: Duration,
    /// Segments read per pass.
    pub max_files_per_pass: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_files_per_pass: 10,
        }
    }
}

/// What one replay pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Segments fully replayed and deleted.
    pub files_replayed: usize,
    /// Events handed back to the queue.
    pub events_replayed: u64,
    /// Records that could not be decoded.
    pub corrupt: u64,
    /// Segments left on disk for a later pass.
    pub files_kept: usize,
}

/// Feeds overflow segments back into the queue.
pub struct Replayer {
    buffer: Arc<OverflowBuffer>,
    queue: EventQueue,
    stats: Arc<BusStats>,
    config: ReplayConfig,
    registry: Option<Arc<SinkRegistry>>,
}

impl Replayer {
    pub fn new(
        buffer: Arc<OverflowBuffer>,
        queue: EventQueue,
        stats: Arc<BusStats>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            buffer,
            queue,
            stats,
            config,
            registry: None,
        }
    }

    /// Hold segments on disk while `registry` has no sinks to deliver to.
    pub fn with_registry(mut self, registry: Arc<SinkRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run passes on a fixed interval until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = crate::shutdown::stopped(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let report = self.pass().await;
                    if report.files_replayed > 0 || report.files_kept > 0 {
                        info!(
                            files = report.files_replayed,
                            events = report.events_replayed,
                            corrupt = report.corrupt,
                            kept = report.files_kept,
                            "Replayed overflow segments"
                        );
                    }
                }
            }
        }
        debug!("Overflow replayer stopped");
    }

    /// Replay up to `max_files_per_pass` segments.
    ///
    /// A segment is deleted only after every event in it has been queued.
    /// If the queue closes part way through, the unqueued remainder is
    /// written back and the pass ends.
    pub async fn pass(&self) -> ReplayReport {
        let mut report = ReplayReport::default();
        if let Some(registry) = &self.registry {
            if registry.is_empty().await {
                return report;
            }
        }
        let segments = match self.buffer.take_sealed(self.config.max_files_per_pass) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(error = %e, "Failed to list overflow segments");
                return report;
            }
        };

        for path in segments {
            let read_path = path.clone();
            let read = match tokio::task::spawn_blocking(move || OverflowBuffer::read_segment(&read_path)).await {
                Ok(Ok(read)) => read,
                Ok(Err(e)) => {
                    warn!(error = %e, "Overflow segment unreadable, keeping it for a later pass");
                    report.files_kept += 1;
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Overflow read task failed");
                    report.files_kept += 1;
                    continue;
                }
            };

            if read.corrupt > 0 {
                self.stats.events_dropped.inc_by(read.corrupt);
                report.corrupt += read.corrupt;
            }

            let mut events = read.events.into_iter();
            while let Some(event) = events.next() {
                match self.queue.enqueue_waiting(event).await {
                    Ok(()) => {
                        self.stats.events_replayed.inc();
                        report.events_replayed += 1;
                    }
                    Err(event) => {
                        let rest: Vec<Event> = std::iter::once(event).chain(events).collect();
                        debug!(remaining = rest.len(), "Queue closed during replay");
                        if let Err(e) = OverflowBuffer::rewrite_segment(&path, &rest) {
                            error!(error = %e, "Failed to write back unreplayed overflow events");
                        }
                        report.files_kept += 1;
                        return report;
                    }
                }
            }

            match OverflowBuffer::remove_segment(&path) {
                Ok(()) => report.files_replayed += 1,
                Err(e) => {
                    // Already queued; deleting later would replay it twice.
                    error!(error = %e, "Failed to delete replayed overflow segment");
                    report.files_kept += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vigil_event_types::{EventId, EventTimestamp, EventType, Severity};

    fn event(n: u32) -> Event {
        let mut context = serde_json::Map::new();
        context.insert("n".into(), n.into());
        Event {
            id: EventId::from_raw(format!("evt-{n}")),
            timestamp: EventTimestamp::now(),
            event_type: EventType::FileIntegrityChange,
            severity: Severity::Medium,
            source: "fsevents_watcher".into(),
            context,
        }
    }

    #[test]
    fn test_append_and_read_back_in_order() {
        let dir = tempdir().unwrap();
        let buffer = OverflowBuffer::open(dir.path()).unwrap();
        for n in 0..5 {
            buffer.append(&event(n)).unwrap();
        }

        let segments = buffer.take_sealed(10).unwrap();
        assert_eq!(segments.len(), 1);
        let name = segments[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("overflow_") && name.ends_with(".jsonl.gz"));

        let read = OverflowBuffer::read_segment(&segments[0]).unwrap();
        let ids: Vec<_> = read.events.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, ["evt-0", "evt-1", "evt-2", "evt-3", "evt-4"]);
        assert_eq!(read.corrupt, 0);
    }

    #[test]
    fn test_segments_roll_and_sort_oldest_first() {
        let dir = tempdir().unwrap();
        let buffer = OverflowBuffer::open(dir.path()).unwrap().with_segment_limit(2);
        for n in 0..5 {
            buffer.append(&event(n)).unwrap();
        }
        buffer.seal();

        let segments = buffer.segments().unwrap();
        assert_eq!(segments.len(), 3);
        let first = OverflowBuffer::read_segment(&segments[0]).unwrap();
        assert_eq!(first.events[0].id.as_str(), "evt-0");
        let last = OverflowBuffer::read_segment(&segments[2]).unwrap();
        assert_eq!(last.events[0].id.as_str(), "evt-4");
    }

    #[test]
    fn test_corrupt_lines_are_counted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overflow_0000000000001_000001.jsonl.gz");
        let good = serde_json::to_string(&event(1)).unwrap();
        let body = format!("{good}\nnot json\n{good}\n");
        fs::write(&path, gzip_member(body.as_bytes()).unwrap()).unwrap();

        let read = OverflowBuffer::read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 2);
        assert_eq!(read.corrupt, 1);
    }

    #[test]
    fn test_truncated_member_keeps_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overflow_0000000000001_000001.jsonl.gz");
        let mut bytes = gzip_member(format!("{}\n", serde_json::to_string(&event(1)).unwrap()).as_bytes()).unwrap();
        let second = gzip_member(format!("{}\n", serde_json::to_string(&event(2)).unwrap()).as_bytes()).unwrap();
        bytes.extend_from_slice(&second[..second.len() / 2]);
        fs::write(&path, bytes).unwrap();

        let read = OverflowBuffer::read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 1);
        assert_eq!(read.corrupt, 1);
    }

    #[test]
    fn test_rewrite_segment_replaces_contents() {
        let dir = tempdir().unwrap();
        let buffer = OverflowBuffer::open(dir.path()).unwrap();
        for n in 0..3 {
            buffer.append(&event(n)).unwrap();
        }
        let path = buffer.take_sealed(1).unwrap().remove(0);

        OverflowBuffer::rewrite_segment(&path, &[event(2)]).unwrap();
        let read = OverflowBuffer::read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 1);
        assert_eq!(read.events[0].id.as_str(), "evt-2");
        assert_eq!(buffer.segment_count(), 1);
    }

    #[test]
    fn test_error_throttle() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert_eq!(throttle.check(t0), Some(0));
        assert_eq!(throttle.check(t0 + Duration::from_secs(1)), None);
        assert_eq!(throttle.check(t0 + Duration::from_secs(2)), None);
        assert_eq!(throttle.check(t0 + Duration::from_secs(11)), Some(2));
    }

    #[tokio::test]
    async fn test_replay_pass_queues_and_deletes() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(OverflowBuffer::open(dir.path()).unwrap());
        for n in 0..4 {
            buffer.append(&event(n)).unwrap();
        }

        let (queue, mut receiver) = EventQueue::new(16);
        let stats = Arc::new(BusStats::new());
        let replayer = Replayer::new(buffer.clone(), queue, stats.clone(), ReplayConfig::default());

        let report = replayer.pass().await;
        assert_eq!(report.files_replayed, 1);
        assert_eq!(report.events_replayed, 4);
        assert_eq!(stats.events_replayed.get(), 4);
        assert_eq!(buffer.segment_count(), 0);

        for n in 0..4 {
            assert_eq!(receiver.recv().await.unwrap().id.to_string(), format!("evt-{n}"));
        }
    }

    struct DiscardSink;

    #[async_trait::async_trait]
    impl crate::fanout::Sink for DiscardSink {
        fn name(&self) -> &str {
            "discard"
        }

        async fn accept(&self, _batch: Arc<crate::batch::EventBatch>) -> Result<(), crate::fanout::SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_replay_waits_for_a_sink() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(OverflowBuffer::open(dir.path()).unwrap());
        buffer.append(&event(0)).unwrap();

        let (queue, mut receiver) = EventQueue::new(4);
        let registry = Arc::new(SinkRegistry::new(Duration::from_secs(1)));
        let replayer = Replayer::new(buffer.clone(), queue, Arc::new(BusStats::new()), ReplayConfig::default())
            .with_registry(registry.clone());

        assert_eq!(replayer.pass().await.files_replayed, 0);
        assert_eq!(buffer.segment_count(), 1);

        registry.register(Arc::new(DiscardSink)).await;

        assert_eq!(replayer.pass().await.files_replayed, 1);
        assert_eq!(receiver.recv().await.unwrap().id.to_string(), "evt-0");
    }

    #[tokio::test]
    async fn test_replay_into_closed_queue_keeps_remainder() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(OverflowBuffer::open(dir.path()).unwrap());
        for n in 0..3 {
            buffer.append(&event(n)).unwrap();
        }

        let (queue, mut receiver) = EventQueue::new(16);
        receiver.close();
        let replayer = Replayer::new(buffer.clone(), queue, Arc::new(BusStats::new()), ReplayConfig::default());

        let report = replayer.pass().await;
        assert_eq!(report.files_kept, 1);
        assert_eq!(report.events_replayed, 0);

        let path = buffer.segments().unwrap().remove(0);
        assert_eq!(OverflowBuffer::read_segment(&path).unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_segment_is_kept() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(OverflowBuffer::open(dir.path()).unwrap());
        // A directory with a segment name cannot be opened as a file.
        fs::create_dir(dir.path().join("overflow_0000000000001_000001.jsonl.gz")).unwrap();

        let (queue, _receiver) = EventQueue::new(4);
        let replayer = Replayer::new(buffer.clone(), queue, Arc::new(BusStats::new()), ReplayConfig::default());

        let report = replayer.pass().await;
        assert_eq!(report.files_kept, 1);
        assert_eq!(buffer.segment_count(), 1);
    }
}
