mod common;

use common::{started_bus, test_config, CollectingSink, SlowSink};
use std::collections::HashSet;
use std::time::Duration;
use tempfile::tempdir;
use vigil_event_bus::{EventBus, EventType, RawEvent, Severity, StatsSnapshot};

const WAIT: Duration = Duration::from_secs(5);

fn signature_hit(id: &str) -> RawEvent {
    RawEvent::new(EventType::SignatureHit)
        .id(id)
        .severity(Severity::High)
        .context("rule", "EICAR-Test")
}

#[tokio::test]
async fn test_every_submission_is_delivered_once() {
    let dir = tempdir().unwrap();
    let (bus, sink) = started_bus(test_config(dir.path())).await;

    let submitted: HashSet<String> = (0..40).map(|n| format!("evt-{n}")).collect();
    for id in &submitted {
        bus.submit(signature_hit(id));
    }

    assert!(sink.wait_for(40, WAIT).await);
    bus.shutdown().await;

    let ids = sink.ids();
    assert_eq!(ids.len(), 40);
    assert_eq!(sink.id_set(), submitted);

    let stats = bus.stats().await;
    assert_eq!(stats.events_received, 40);
    assert_eq!(stats.events_sent, 40);
    assert_eq!(stats.events_dropped, 0);
    assert_eq!(stats.events_buffered, 0);
    assert_eq!(stats.sinks[0].failed_batches, 0);
}

#[tokio::test]
async fn test_every_sink_sees_every_event() {
    let dir = tempdir().unwrap();
    let bus = EventBus::new(test_config(dir.path())).unwrap();
    let first = CollectingSink::new();
    let second = CollectingSink::new();
    bus.register_sink(first.clone()).await;
    bus.register_sink(second.clone()).await;
    bus.start().await.unwrap();

    for n in 0..10 {
        bus.submit(signature_hit(&format!("evt-{n}")));
    }
    assert!(first.wait_for(10, WAIT).await);
    assert!(second.wait_for(10, WAIT).await);
    bus.shutdown().await;

    assert_eq!(first.id_set(), second.id_set());
    assert_eq!(first.batch_ids(), second.batch_ids());
}

#[tokio::test]
async fn test_slow_sink_does_not_hold_back_other_sinks() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.sink_queue = 2;
    let bus = EventBus::new(config).unwrap();
    let slow = SlowSink::new(Duration::from_millis(500));
    let fast = CollectingSink::new();
    bus.register_sink(slow.clone()).await;
    bus.register_sink(fast.clone()).await;
    bus.start().await.unwrap();

    for n in 0..1000 {
        bus.submit(signature_hit(&format!("evt-{n}")));
    }

    assert!(fast.wait_for(1000, Duration::from_secs(2)).await);
    assert!(slow.event_count() < 1000, "slow sink still working");
    bus.shutdown().await;

    let stats = bus.stats().await;
    assert_eq!(fast.ids().len(), 1000);
    assert_eq!(stats.events_buffered, 0);
    assert_eq!(stats.sinks[0].name, "slow");
    assert_eq!(stats.sinks[1].name, "collector");
    assert_eq!(stats.sinks[1].failed_batches, 0);
    assert_eq!(stats.sinks[1].delivered_batches, stats.batches_dispatched);
    assert!(stats.sinks[0].failed_batches > 0);
    assert!(stats.sinks[0].last_error.as_deref().unwrap().contains("queue full"));
    assert_eq!(
        stats.sinks[0].delivered_batches + stats.sinks[0].failed_batches,
        stats.batches_dispatched
    );
}

#[tokio::test]
async fn test_duplicate_within_window_is_suppressed() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.dedup_window = Some(Duration::from_millis(300));
    let (bus, sink) = started_bus(config).await;

    bus.submit(signature_hit("repeat"));
    bus.submit(signature_hit("repeat"));
    assert!(sink.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.ids().len(), 1);

    // Past the window the same occurrence is delivered again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    bus.submit(signature_hit("repeat"));
    assert!(sink.wait_for(2, WAIT).await);
    bus.shutdown().await;

    assert_eq!(sink.ids(), ["repeat", "repeat"]);
    let stats = bus.stats().await;
    assert_eq!(stats.events_received, 3);
    assert_eq!(stats.events_suppressed, 1);
}

#[tokio::test]
async fn test_duplicate_scenario_counts() {
    let dir = tempdir().unwrap();
    let (bus, sink) = started_bus(test_config(dir.path())).await;

    let a = RawEvent::new(EventType::RansomwareActivity)
        .id("A")
        .severity(Severity::Critical)
        .context("path", "/Users/me/Documents");
    let b = a.clone();
    let c = RawEvent::new(EventType::CronModification)
        .id("C")
        .severity(Severity::Low);

    bus.submit(a);
    bus.submit(b);
    bus.submit(c);

    assert!(sink.wait_for(2, WAIT).await);
    bus.shutdown().await;

    let stats = bus.stats().await;
    assert_eq!(stats.events_received, 3);
    assert_eq!(stats.events_suppressed, 1);
    assert_eq!(sink.id_set(), HashSet::from(["A".to_string(), "C".to_string()]));

    let delivered = sink.events();
    let a = delivered.iter().find(|e| e.id.as_str() == "A").unwrap();
    assert_eq!(a.severity, Severity::Critical);
    let c = delivered.iter().find(|e| e.id.as_str() == "C").unwrap();
    assert_eq!(c.event_type, EventType::CronModification);
    assert_eq!(c.source, "cron_auditor");
}

#[tokio::test]
async fn test_malformed_fields_are_defaulted_and_forwarded() {
    let dir = tempdir().unwrap();
    let (bus, sink) = started_bus(test_config(dir.path())).await;

    bus.submit(
        RawEvent::with_type_name("definitely_not_a_type")
            .field("severity", "apocalyptic")
            .timestamp("yesterday-ish"),
    );
    assert!(sink.wait_for(1, WAIT).await);
    bus.shutdown().await;

    let event = &sink.events()[0];
    assert_eq!(event.event_type, EventType::Generic);
    assert_eq!(event.severity, Severity::Medium);
    assert_eq!(event.source, "unknown");
    assert!(bus.stats().await.validation_warnings >= 2);
}

#[tokio::test]
async fn test_shutdown_flushes_partial_batch_and_closes_sinks() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.batch.max_batch_size = 1_000;
    config.batch.max_batch_age = Duration::from_secs(60);
    let (bus, sink) = started_bus(config).await;

    for n in 0..7 {
        bus.submit(signature_hit(&format!("evt-{n}")));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.ids().is_empty());

    bus.shutdown().await;

    assert_eq!(sink.ids().len(), 7);
    assert_eq!(sink.batch_ids(), [1]);
    assert!(sink.is_closed());
    assert!(bus.is_shutting_down());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let dir = tempdir().unwrap();
    let (bus, _sink) = started_bus(test_config(dir.path())).await;
    assert!(bus.start().await.is_err());
    bus.shutdown().await;
    // A second shutdown returns once the first has completed.
    bus.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_runs_on_spawned_tasks() {
    let dir = tempdir().unwrap();
    let bus = EventBus::new(test_config(dir.path())).unwrap();
    let sink = CollectingSink::new();
    bus.register_sink(sink.clone()).await;

    let starter = bus.clone();
    tokio::spawn(async move { starter.start().await })
        .await
        .unwrap()
        .unwrap();
    bus.submit(signature_hit("evt-1"));

    let stopper = bus.clone();
    tokio::spawn(async move { stopper.shutdown().await }).await.unwrap();
    assert_eq!(sink.ids(), ["evt-1"]);
}

#[tokio::test]
async fn test_stats_snapshot_serializes_monitoring_fields() {
    let dir = tempdir().unwrap();
    let (bus, sink) = started_bus(test_config(dir.path())).await;
    bus.submit(signature_hit("evt-1"));
    assert!(sink.wait_for(1, WAIT).await);
    bus.shutdown().await;

    let json = serde_json::to_value(bus.stats().await).unwrap();
    for key in [
        "events_received",
        "events_sent",
        "events_dropped",
        "queue_size",
        "buffer_files",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    let back: StatsSnapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back.events_received, 1);
    assert_eq!(back.sinks[0].name, "collector");
}
