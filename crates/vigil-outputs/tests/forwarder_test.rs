use mockito::{Matcher, Server};
use std::sync::Arc;
use std::time::Duration;
use vigil_event_bus::{EventBatch, Sink, SinkError};
use vigil_event_types::{Event, EventId, EventTimestamp, EventType, Severity};
use vigil_outputs::{ForwarderConfig, ForwarderSink};

const COLLECTOR: &str = "/services/collector/event";

fn batch(id: u64, count: usize) -> Arc<EventBatch> {
    let events = (0..count)
        .map(|n| Event {
            id: EventId::from_raw(format!("evt-{id}-{n}")),
            timestamp: EventTimestamp::parse("2026-03-01T12:00:00.000Z"),
            event_type: EventType::IdsAlert,
            severity: Severity::Critical,
            source: "ids_engine".into(),
            context: Default::default(),
        })
        .collect();
    Arc::new(EventBatch::new(id, events))
}

fn forwarder(url: String, batch_size: usize) -> ForwarderSink {
    ForwarderSink::new(ForwarderConfig {
        url,
        token: Some("test-token".into()),
        index: "security".into(),
        host: "mac-mini".into(),
        batch_size,
        max_buffered: 8,
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_sends_once_batch_size_is_reached() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR)
        .match_header("authorization", "Splunk test-token")
        .match_header("content-type", "application/json")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""sourcetype":"vigil:ids_alert""#.into()),
            Matcher::Regex(r#""index":"security""#.into()),
            Matcher::Regex(r#""host":"mac-mini""#.into()),
            Matcher::Regex(r#""time":1772366400"#.into()),
        ]))
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0}"#)
        .expect(1)
        .create_async()
        .await;

    let sink = forwarder(server.url(), 4);
    sink.accept(batch(1, 2)).await.unwrap();
    assert_eq!(sink.buffered().await, 2);
    sink.accept(batch(2, 2)).await.unwrap();
    assert_eq!(sink.buffered().await, 0);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_request_keeps_events_for_retry() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", COLLECTOR)
        .with_status(503)
        .with_body("busy")
        .expect(1)
        .create_async()
        .await;

    let sink = forwarder(server.url(), 2);
    let err = sink.accept(batch(1, 2)).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected { status: 503, .. }));
    assert_eq!(sink.buffered().await, 2);
    failing.assert_async().await;
    failing.remove_async().await;

    let ok = server
        .mock("POST", COLLECTOR)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    sink.accept(batch(2, 1)).await.unwrap();
    assert_eq!(sink.buffered().await, 0);
    ok.assert_async().await;
}

#[tokio::test]
async fn test_buffer_drops_oldest_beyond_limit() {
    // Batch size is never reached, so nothing is sent.
    let sink = forwarder("http://127.0.0.1:9".into(), 100);

    sink.accept(batch(1, 6)).await.unwrap();
    sink.accept(batch(2, 6)).await.unwrap();
    assert_eq!(sink.buffered().await, 8);
}

#[tokio::test]
async fn test_close_flushes_partial_buffer() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COLLECTOR)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let sink = forwarder(server.url(), 100);
    sink.accept(batch(1, 3)).await.unwrap();
    assert_eq!(sink.buffered().await, 3);
    sink.close().await.unwrap();
    assert_eq!(sink.buffered().await, 0);
    mock.assert_async().await;
}
