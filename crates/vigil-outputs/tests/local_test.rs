use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;
use vigil_event_bus::{EventBatch, Sink};
use vigil_event_types::{Event, EventId, EventTimestamp, EventType, Severity};
use vigil_outputs::{LocalFileConfig, LocalFileSink};

fn batch(id: u64, count: usize) -> Arc<EventBatch> {
    let events = (0..count)
        .map(|n| Event {
            id: EventId::from_raw(format!("evt-{id}-{n}")),
            timestamp: EventTimestamp::now(),
            event_type: EventType::UserAccountChange,
            severity: Severity::High,
            source: "user_account_auditor".into(),
            context: serde_json::json!({"user": "svc_backup", "change": "added_to_admin"})
                .as_object()
                .cloned()
                .unwrap(),
        })
        .collect();
    Arc::new(EventBatch::new(id, events))
}

fn event_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_rotation_keeps_every_file_under_threshold() {
    let dir = tempdir().unwrap();
    let mut config = LocalFileConfig::new(dir.path());
    config.max_file_size = 4 * 1024;
    let sink = LocalFileSink::new(config).unwrap();

    for id in 0..20 {
        sink.accept(batch(id, 10)).await.unwrap();
    }
    sink.close().await.unwrap();

    let files = event_files(dir.path());
    assert!(files.len() > 1, "expected rotation, got {} file(s)", files.len());

    let mut lines = 0;
    for file in &files {
        let size = std::fs::metadata(file).unwrap().len();
        assert!(size <= 4 * 1024, "{} is {size} bytes", file.display());
        let content = std::fs::read_to_string(file).unwrap();
        for line in content.lines() {
            serde_json::from_str::<Event>(line).unwrap();
            lines += 1;
        }
    }
    assert_eq!(lines, 200);
}

#[tokio::test]
async fn test_new_sink_starts_a_new_file() {
    let dir = tempdir().unwrap();

    let first = LocalFileSink::new(LocalFileConfig::new(dir.path())).unwrap();
    first.accept(batch(1, 1)).await.unwrap();
    first.close().await.unwrap();

    let second = LocalFileSink::new(LocalFileConfig::new(dir.path())).unwrap();
    second.accept(batch(2, 1)).await.unwrap();
    second.close().await.unwrap();

    let files = event_files(dir.path());
    assert_eq!(files.len(), 2);
    for file in files {
        assert_eq!(std::fs::read_to_string(file).unwrap().lines().count(), 1);
    }
}
