//! Event identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a single event.
///
/// Producers may supply their own identifiers, which are kept verbatim even
/// when they are not UUIDs. Generated identifiers are random v4 UUIDs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a new random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a producer-supplied identifier.
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifier is a canonical lowercase-insensitive UUID v4.
    pub fn is_uuid_v4(&self) -> bool {
        Uuid::parse_str(&self.0)
            .map(|u| u.get_version_num() == 4 && self.0.len() == 36)
            .unwrap_or(false)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::from_raw(s)
    }
}
