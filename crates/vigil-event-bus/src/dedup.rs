//! Duplicate burst suppression.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use vigil_event_types::Event;

/// Stable identity of an event for duplicate detection.
///
/// Two events share a fingerprint when they have the same type, source and
/// set of context keys (and the same producer-supplied identifier, when there
/// is one). Context values are deliberately not part of it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an event. Generated identifiers are unique per submission
    /// and must not be included, so pass `include_id = false` for them.
    pub fn of(event: &Event, include_id: bool) -> Self {
        let mut context_keys: Vec<&str> = event.context.keys().map(String::as_str).collect();
        context_keys.sort_unstable();

        let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
        if include_id {
            fields.insert("event_id", json!(event.id.as_str()));
        }
        fields.insert("event_type", json!(event.event_type.as_ref()));
        fields.insert("source", json!(event.source));
        fields.insert("context_keys", json!(context_keys));

        let canonical = Value::from_iter(fields).to_string();

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.0[..12.min(self.0.len())])
    }
}

/// Outcome of a dedup lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// First sighting inside the window; recorded.
    Accepted,
    /// Seen within the window; drop it.
    Suppressed,
    /// Timestamp not parseable; passed through without being recorded.
    Unchecked,
}

impl DedupVerdict {
    /// Whether the event continues down the pipeline.
    pub fn is_delivered(self) -> bool {
        !matches!(self, Self::Suppressed)
    }
}

/// Suppresses events whose fingerprint was seen within a sliding window.
pub struct DedupFilter {
    window: TimeDelta,
    seen: Mutex<HashMap<Fingerprint, DateTime<Utc>>>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: TimeDelta::milliseconds(window.as_millis().min(i64::MAX as u128) as i64),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Check an event against the window, using the wall clock as arrival time.
    pub fn check(&self, event: &Event, id_supplied: bool) -> DedupVerdict {
        self.check_at(event, id_supplied, Utc::now())
    }

    /// Check an event against the window with an explicit arrival time.
    ///
    /// Sightings are compared by event time. Entries older than
    /// `arrival - window` are purged first. A suppressed duplicate does not
    /// refresh its entry, so a steady stream of repeats is let through once
    /// per window.
    pub fn check_at(&self, event: &Event, id_supplied: bool, arrival: DateTime<Utc>) -> DedupVerdict {
        let Some(event_time) = event.timestamp.parsed() else {
            return DedupVerdict::Unchecked;
        };
        let fingerprint = Fingerprint::of(event, id_supplied);
        let cutoff = arrival - self.window;

        let mut seen = self.seen.lock();
        seen.retain(|_, last| *last > cutoff);

        if let Some(last) = seen.get(&fingerprint) {
            if (event_time - *last).abs() < self.window {
                return DedupVerdict::Suppressed;
            }
        }

        seen.insert(fingerprint, event_time);
        DedupVerdict::Accepted
    }

    /// Number of fingerprints currently remembered.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Map;
    use vigil_event_types::{EventId, EventTimestamp, EventType, Severity};

    fn event_at(at: DateTime<Utc>, context: &[(&str, Value)]) -> Event {
        let mut map = Map::new();
        for (k, v) in context {
            map.insert(k.to_string(), v.clone());
        }
        Event {
            id: EventId::generate(),
            timestamp: EventTimestamp::from_datetime(at),
            event_type: EventType::NetworkConnection,
            severity: Severity::Low,
            source: "network_watcher".into(),
            context: map,
        }
    }

    #[test]
    fn test_duplicate_within_window_is_suppressed() {
        let filter = DedupFilter::new(Duration::from_secs(5));
        let now = Utc::now();
        let first = event_at(now, &[("remote", json!("10.0.0.1"))]);
        let repeat = event_at(now + TimeDelta::seconds(2), &[("remote", json!("10.0.0.2"))]);

        assert_eq!(filter.check_at(&first, false, now), DedupVerdict::Accepted);
        assert_eq!(
            filter.check_at(&repeat, false, now + TimeDelta::seconds(2)),
            DedupVerdict::Suppressed
        );
    }

    #[test]
    fn test_repeat_after_window_is_accepted() {
        let filter = DedupFilter::new(Duration::from_secs(5));
        let now = Utc::now();
        let first = event_at(now, &[]);
        let later = event_at(now + TimeDelta::seconds(6), &[]);

        assert_eq!(filter.check_at(&first, false, now), DedupVerdict::Accepted);
        assert_eq!(
            filter.check_at(&later, false, now + TimeDelta::seconds(6)),
            DedupVerdict::Accepted
        );
    }

    #[test]
    fn test_suppressed_duplicate_does_not_refresh() {
        let filter = DedupFilter::new(Duration::from_secs(5));
        let t0 = Utc::now();
        let at = |secs| t0 + TimeDelta::seconds(secs);

        assert_eq!(filter.check_at(&event_at(at(0), &[]), false, at(0)), DedupVerdict::Accepted);
        assert_eq!(filter.check_at(&event_at(at(4), &[]), false, at(4)), DedupVerdict::Suppressed);
        // Measured from the first sighting, not the suppressed one.
        assert_eq!(filter.check_at(&event_at(at(5), &[]), false, at(5)), DedupVerdict::Accepted);
    }

    #[test]
    fn test_stale_entries_are_purged() {
        let filter = DedupFilter::new(Duration::from_secs(5));
        let t0 = Utc::now();
        filter.check_at(&event_at(t0, &[("a", json!(1))]), false, t0);
        filter.check_at(&event_at(t0, &[("b", json!(1))]), false, t0);
        assert_eq!(filter.len(), 2);

        let later = t0 + TimeDelta::seconds(30);
        filter.check_at(&event_at(later, &[("c", json!(1))]), false, later);
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_unparseable_timestamp_fails_open() {
        let filter = DedupFilter::new(Duration::from_secs(5));
        let mut event = event_at(Utc::now(), &[]);
        event.timestamp = EventTimestamp::parse("not a time");

        assert_eq!(filter.check(&event, false), DedupVerdict::Unchecked);
        assert_eq!(filter.check(&event, false), DedupVerdict::Unchecked);
        assert!(filter.is_empty());
    }

    #[test]
    fn test_supplied_ids_distinguish_events() {
        let now = Utc::now();
        let mut a = event_at(now, &[]);
        let mut b = event_at(now, &[]);
        a.id = EventId::from_raw("alpha");
        b.id = EventId::from_raw("beta");

        assert_ne!(Fingerprint::of(&a, true), Fingerprint::of(&b, true));
        assert_eq!(Fingerprint::of(&a, false), Fingerprint::of(&b, false));
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = Fingerprint::of(&event_at(Utc::now(), &[]), false);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_context_values(
            keys in proptest::collection::btree_set("[a-z]{1,8}", 0..6),
            seed in any::<i64>(),
        ) {
            let now = Utc::now();
            let first: Vec<(&str, Value)> =
                keys.iter().map(|k| (k.as_str(), json!(seed))).collect();
            let second: Vec<(&str, Value)> =
                keys.iter().rev().map(|k| (k.as_str(), json!(format!("{seed}-x")))).collect();

            prop_assert_eq!(
                Fingerprint::of(&event_at(now, &first), false),
                Fingerprint::of(&event_at(now, &second), false)
            );
        }

        #[test]
        fn fingerprint_depends_on_type(ty_index in 0usize..13) {
            let now = Utc::now();
            let base = event_at(now, &[]);
            let mut other = base.clone();
            other.event_type = EventType::all().nth(ty_index).unwrap_or(EventType::Generic);
            if other.event_type != base.event_type {
                prop_assert_ne!(Fingerprint::of(&base, false), Fingerprint::of(&other, false));
            }
        }
    }
}
