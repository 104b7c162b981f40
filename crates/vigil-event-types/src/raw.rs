//! Loosely structured producer input.

use crate::{EventType, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event as submitted by a producer, before normalization.
///
/// This is a plain JSON object: external producers may send any shape, and
/// the normalizer decides what to keep. In-process collectors can use the
/// builder methods instead of assembling JSON by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Map<String, Value>);

impl RawEvent {
    /// Start a raw event of the given type.
    pub fn new(event_type: EventType) -> Self {
        Self::default().field("event_type", event_type.as_ref())
    }

    /// Start a raw event with a free-form type name.
    pub fn with_type_name(name: impl Into<String>) -> Self {
        Self::default().field("event_type", name.into())
    }

    /// Set the event identifier.
    pub fn id(self, id: impl Into<String>) -> Self {
        self.field("event_id", id.into())
    }

    /// Set the timestamp text.
    pub fn timestamp(self, ts: impl Into<String>) -> Self {
        self.field("timestamp", ts.into())
    }

    /// Set the severity.
    pub fn severity(self, severity: Severity) -> Self {
        self.field("severity", severity.to_string())
    }

    /// Set the source collector name.
    pub fn source(self, source: impl Into<String>) -> Self {
        self.field("source", source.into())
    }

    /// Set the human-readable message.
    pub fn message(self, message: impl Into<String>) -> Self {
        self.field("message", message.into())
    }

    /// Add a context attribute.
    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json) = serde_json::to_value(value) {
            let context = self
                .0
                .entry("context")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = context {
                map.insert(key.into(), json);
            }
        }
        self
    }

    /// Set an arbitrary top-level field.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the underlying object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for RawEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for RawEvent {
    type Error = Value;

    /// Only JSON objects are events; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}
