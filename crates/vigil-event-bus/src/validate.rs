//! Event validation and normalization.
//!
//! Producers are loosely disciplined, so nothing here rejects an event.
//! Every missing field gets a default and every structural problem becomes a
//! [`ValidationWarning`] that travels alongside the normalized [`Event`].

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use vigil_event_types::{Event, EventId, EventTimestamp, EventType, RawEvent, Severity};

/// A non-fatal problem found while normalizing an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    /// Field the warning applies to.
    pub field: &'static str,
    /// The offending value, as received.
    pub value: Value,
    /// What was wrong with it.
    pub reason: &'static str,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (got {})", self.field, self.reason, self.value)
    }
}

/// The result of normalizing a raw event.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub event: Event,
    pub warnings: Vec<ValidationWarning>,
    /// The identifier was generated rather than supplied by the producer.
    pub id_generated: bool,
}

impl Normalized {
    /// Whether the event passed every structural check.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Default)]
struct Warnings(Vec<ValidationWarning>);

impl Warnings {
    fn push(&mut self, field: &'static str, value: &Value, reason: &'static str) {
        self.0.push(ValidationWarning {
            field,
            value: value.clone(),
            reason,
        });
    }
}

/// Normalize a raw producer record into an [`Event`].
pub fn normalize(raw: RawEvent) -> Normalized {
    let mut map = raw.into_map();
    let mut warnings = Warnings::default();

    let (id, id_generated) = take_id(&mut map, &mut warnings);
    let timestamp = take_timestamp(&mut map, &mut warnings);
    let event_type = take_event_type(&mut map, &mut warnings);
    let severity = take_severity(&mut map, &mut warnings);
    let source = take_source(&mut map, event_type, &mut warnings);
    let context = take_context(&mut map, &mut warnings);

    Normalized {
        event: Event {
            id,
            timestamp,
            event_type,
            severity,
            source,
            context,
        },
        warnings: warnings.0,
        id_generated,
    }
}

fn take_first(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for key in keys {
        if let Some(value) = map.remove(*key) {
            if found.is_none() && !value.is_null() {
                found = Some(value);
            }
        }
    }
    found
}

fn take_id(map: &mut Map<String, Value>, warnings: &mut Warnings) -> (EventId, bool) {
    match take_first(map, &["event_id", "id"]) {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            let id = EventId::from_raw(s);
            if !id.is_uuid_v4() {
                warnings.push("event_id", &Value::String(id.to_string()), "not a UUID v4");
            }
            (id, false)
        }
        Some(Value::Number(n)) => {
            let value = Value::Number(n.clone());
            warnings.push("event_id", &value, "expected a string");
            (EventId::from_raw(n.to_string()), false)
        }
        Some(other) => {
            warnings.push("event_id", &other, "unusable identifier, generated a new one");
            (EventId::generate(), true)
        }
        None => (EventId::generate(), true),
    }
}

fn take_timestamp(map: &mut Map<String, Value>, warnings: &mut Warnings) -> EventTimestamp {
    match map.remove("timestamp") {
        Some(Value::String(s)) => {
            let ts = EventTimestamp::parse(s);
            if !ts.is_valid() {
                warnings.push(
                    "timestamp",
                    &Value::String(ts.as_str().to_string()),
                    "not an ISO 8601 timestamp",
                );
            }
            ts
        }
        None | Some(Value::Null) => EventTimestamp::now(),
        Some(other) => {
            warnings.push("timestamp", &other, "expected a string, used the current time");
            EventTimestamp::now()
        }
    }
}

fn take_event_type(map: &mut Map<String, Value>, warnings: &mut Warnings) -> EventType {
    match take_first(map, &["event_type", "type"]) {
        Some(Value::String(s)) => match EventType::parse(&s) {
            Some(ty) => ty,
            None => {
                warnings.push("event_type", &Value::String(s), "unknown event type");
                EventType::Generic
            }
        },
        Some(other) => {
            warnings.push("event_type", &other, "expected a string");
            EventType::Generic
        }
        None => {
            warnings.push("event_type", &Value::Null, "missing event type");
            EventType::Generic
        }
    }
}

fn take_severity(map: &mut Map<String, Value>, warnings: &mut Warnings) -> Severity {
    match map.remove("severity") {
        Some(Value::String(s)) => Severity::from_str(s.trim()).unwrap_or_else(|_| {
            warnings.push("severity", &Value::String(s), "unknown severity");
            Severity::default()
        }),
        None | Some(Value::Null) => Severity::default(),
        Some(other) => {
            warnings.push("severity", &other, "expected a string");
            Severity::default()
        }
    }
}

fn take_source(
    map: &mut Map<String, Value>,
    event_type: EventType,
    warnings: &mut Warnings,
) -> String {
    let derived = || event_type.default_source().to_string();

    match map.remove("source") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        None | Some(Value::Null) | Some(Value::String(_)) => derived(),
        Some(other) => {
            warnings.push("source", &other, "expected a string");
            derived()
        }
    }
}

fn take_context(map: &mut Map<String, Value>, warnings: &mut Warnings) -> Map<String, Value> {
    let mut context = match map.remove("context") {
        Some(Value::Object(context)) => context,
        None | Some(Value::Null) => Map::new(),
        Some(other) => {
            warnings.push("context", &other, "expected an object, wrapped as value");
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), other);
            wrapped
        }
    };

    if let Some(message) = map.remove("message") {
        if !message.is_null() && !context.contains_key("message") {
            context.insert("message".to_string(), message);
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_event_types::UNKNOWN_SOURCE;

    fn raw(value: Value) -> RawEvent {
        RawEvent::try_from(value).unwrap()
    }

    #[test]
    fn test_minimal_event_gets_defaults() {
        let normalized = normalize(raw(json!({"event_type": "file_integrity_change"})));
        let event = &normalized.event;

        assert!(normalized.id_generated);
        assert!(event.id.is_uuid_v4());
        assert!(event.timestamp.is_valid());
        assert_eq!(event.event_type, EventType::FileIntegrityChange);
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.source, "fsevents_watcher");
        assert!(event.context.is_empty());
        assert!(normalized.is_clean());
    }

    #[test]
    fn test_producer_values_are_kept() {
        let normalized = normalize(raw(json!({
            "event_id": "3f0c1f9e-2b6a-4c1d-9a57-5c1f2a4b8e10",
            "timestamp": "2024-01-15T10:30:45Z",
            "event_type": "ssh_key_change",
            "severity": "CRITICAL",
            "source": "custom_auditor",
            "context": {"path": "/Users/me/.ssh/authorized_keys"}
        })));
        let event = &normalized.event;

        assert!(!normalized.id_generated);
        assert_eq!(event.id.as_str(), "3f0c1f9e-2b6a-4c1d-9a57-5c1f2a4b8e10");
        assert_eq!(event.timestamp.as_str(), "2024-01-15T10:30:45Z");
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.source, "custom_auditor");
        assert!(normalized.is_clean());
    }

    #[test]
    fn test_legacy_aliases_without_warning() {
        let normalized = normalize(raw(json!({"type": "fs", "id": "legacy-1"})));
        assert_eq!(normalized.event.event_type, EventType::FileIntegrityChange);
        assert_eq!(normalized.event.id.as_str(), "legacy-1");
        // Only the non-UUID identifier is flagged.
        assert_eq!(normalized.warnings.len(), 1);
        assert_eq!(normalized.warnings[0].field, "event_id");
    }

    #[test]
    fn test_unknown_type_defaults_to_generic_with_warning() {
        let normalized = normalize(raw(json!({"event_type": "quantum_flux"})));
        assert_eq!(normalized.event.event_type, EventType::Generic);
        assert_eq!(normalized.event.source, UNKNOWN_SOURCE);
        assert!(normalized
            .warnings
            .iter()
            .any(|w| w.field == "event_type" && w.value == json!("quantum_flux")));
    }

    #[test]
    fn test_bad_timestamp_is_kept_and_flagged() {
        let normalized = normalize(raw(json!({"event_type": "dns_request", "timestamp": "soon"})));
        assert_eq!(normalized.event.timestamp.as_str(), "soon");
        assert!(normalized.warnings.iter().any(|w| w.field == "timestamp"));
    }

    #[test]
    fn test_unknown_severity_defaults_to_medium() {
        let normalized = normalize(raw(json!({"event_type": "ids_alert", "severity": "apocalyptic"})));
        assert_eq!(normalized.event.severity, Severity::Medium);
        assert!(normalized.warnings.iter().any(|w| w.field == "severity"));
    }

    #[test]
    fn test_scalar_context_is_wrapped() {
        let normalized = normalize(raw(json!({"event_type": "config_change", "context": "raw text"})));
        assert_eq!(normalized.event.context["value"], "raw text");
        assert!(normalized.warnings.iter().any(|w| w.field == "context"));
    }

    #[test]
    fn test_message_folds_into_context() {
        let normalized = normalize(raw(json!({
            "event_type": "process_anomaly",
            "message": "unsigned binary launched"
        })));
        assert_eq!(normalized.event.message(), Some("unsigned binary launched"));

        let existing = normalize(raw(json!({
            "event_type": "process_anomaly",
            "message": "outer",
            "context": {"message": "inner"}
        })));
        assert_eq!(existing.event.message(), Some("inner"));
    }

    #[test]
    fn test_numeric_id_is_stringified() {
        let normalized = normalize(raw(json!({"event_type": "generic", "event_id": 42})));
        assert_eq!(normalized.event.id.as_str(), "42");
        assert!(!normalized.id_generated);
    }
}
