//! Context compression for broadcast payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::io::{Read, Write};
use tracing::warn;
use vigil_event_types::Event;

/// Tag placed in `context_encoding` on compressed events.
pub const CONTEXT_ENCODING: &str = "gzip+base64";

/// Serialize an event for broadcast, compressing a large context.
///
/// When the serialized context is longer than `threshold` bytes it is
/// gzipped and base64-encoded into `context_compressed`, `context` becomes
/// `null`, and `context_encoding` names the scheme. Smaller contexts are
/// left untouched.
pub fn compress_context(event: &Event, threshold: usize) -> Value {
    let mut value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "Failed to serialize event for broadcast");
            return Value::Null;
        }
    };

    let Ok(context) = serde_json::to_vec(&event.context) else {
        return value;
    };
    if context.len() <= threshold {
        return value;
    }

    let compressed = match gzip(&context) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "Context compression failed, sending uncompressed");
            return value;
        }
    };

    if let Some(object) = value.as_object_mut() {
        object.insert("context".into(), Value::Null);
        object.insert("context_compressed".into(), Value::String(STANDARD.encode(compressed)));
        object.insert("context_encoding".into(), Value::String(CONTEXT_ENCODING.into()));
    }
    value
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Recover the context of a broadcast event.
///
/// Returns the plain `context` for uncompressed events and `None` when the
/// compressed payload cannot be decoded.
pub fn decompress_context(event: &Value) -> Option<Map<String, Value>> {
    match event.get("context_encoding").and_then(Value::as_str) {
        Some(CONTEXT_ENCODING) => {
            let encoded = event.get("context_compressed")?.as_str()?;
            let compressed = STANDARD.decode(encoded).ok()?;
            let mut json = Vec::new();
            GzDecoder::new(compressed.as_slice())
                .read_to_end(&mut json)
                .ok()?;
            serde_json::from_slice(&json).ok()
        }
        Some(_) => None,
        None => event.get("context")?.as_object().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_event_types::{EventId, EventTimestamp, EventType, Severity};

    fn event_with_context(context: Value) -> Event {
        Event {
            id: EventId::from_raw("evt-1"),
            timestamp: EventTimestamp::now(),
            event_type: EventType::ProcessAnomaly,
            severity: Severity::High,
            source: "process_watcher".into(),
            context: context.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_small_context_is_left_alone() {
        let event = event_with_context(json!({"pid": 42}));
        let value = compress_context(&event, 1024);
        assert_eq!(value["context"]["pid"], 42);
        assert!(value.get("context_compressed").is_none());
        assert_eq!(decompress_context(&value).unwrap()["pid"], 42);
    }

    #[test]
    fn test_large_context_is_compressed_and_recoverable() {
        let cmdline = "A".repeat(4096);
        let event = event_with_context(json!({"cmdline": cmdline, "pid": 7}));
        let value = compress_context(&event, 1024);

        assert!(value["context"].is_null());
        assert_eq!(value["context_encoding"], CONTEXT_ENCODING);
        let encoded = value["context_compressed"].as_str().unwrap();
        assert!(encoded.len() < 4096);

        let context = decompress_context(&value).unwrap();
        assert_eq!(context["cmdline"].as_str().unwrap().len(), 4096);
        assert_eq!(context["pid"], 7);
    }

    #[test]
    fn test_unknown_encoding_is_not_decoded() {
        let value = json!({"context": null, "context_encoding": "zstd", "context_compressed": "AAAA"});
        assert!(decompress_context(&value).is_none());
    }
}
