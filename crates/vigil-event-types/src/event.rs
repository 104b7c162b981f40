//! Core telemetry event type.

use crate::{EventId, EventTimestamp, EventType, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized telemetry event.
///
/// Events are produced by the normalizer and never mutated afterwards; sinks
/// only ever see them through shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    #[serde(rename = "event_id")]
    pub id: EventId,
    /// When the event occurred.
    pub timestamp: EventTimestamp,
    /// Event kind.
    pub event_type: EventType,
    /// Event severity.
    pub severity: Severity,
    /// Collector that emitted the event.
    pub source: String,
    /// Open attribute mapping.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Event {
    /// Look up a context attribute.
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// The human-readable message carried in the context, if any.
    pub fn message(&self) -> Option<&str> {
        self.context.get("message").and_then(Value::as_str)
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
