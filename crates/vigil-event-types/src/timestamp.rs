//! Event timestamps.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// When an event occurred, as reported by its producer.
///
/// The producer's text is kept verbatim so a malformed timestamp still reaches
/// the sinks; `parsed` is only set when the text is ISO 8601 / RFC 3339.
#[derive(Clone, PartialEq, Eq)]
pub struct EventTimestamp {
    raw: String,
    parsed: Option<DateTime<Utc>>,
}

impl EventTimestamp {
    /// The current UTC time with millisecond precision.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from a known instant, formatted with millisecond precision.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self::parse(at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Wrap producer text, parsing it when possible.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = parse_iso8601(&raw);
        Self { raw, parsed }
    }

    /// The timestamp text as it will be serialized.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed instant, if the text was parseable.
    pub fn parsed(&self) -> Option<DateTime<Utc>> {
        self.parsed
    }

    /// Whether the text was parseable.
    pub fn is_valid(&self) -> bool {
        self.parsed.is_some()
    }
}

fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Zone-less timestamps are taken as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl fmt::Display for EventTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for EventTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTimestamp({})", self.raw)
    }
}

impl Serialize for EventTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for EventTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::parse)
    }
}
