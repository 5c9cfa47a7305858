//! Change events and the topic they travel on.
//!
//! A [`ChangeEvent`] is built once by a write handler after a successful
//! mutation and then serialized exactly once into the wire envelope:
//!
//! ```json
//! { "event": "add-card", "card": "A1B2", "occurredAt": "2024-05-01T08:30:00.000Z" }
//! ```
//!
//! Payload fields are flattened next to the `event` discriminator so a viewer
//! can render the change without a follow-up query.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::scan::ScanEntry;

/// Channel name used when no topic is configured.
pub const DEFAULT_TOPIC: &str = "db-change";

/// Kind of mutation an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A card was presented at a reader.
    #[serde(rename = "new-scan")]
    NewScan,
    /// A card was added to the valid set.
    #[serde(rename = "add-card")]
    CardAdded,
    /// A card was removed from the valid set.
    #[serde(rename = "delete-card")]
    CardRemoved,
}

impl EventKind {
    /// Wire discriminator carried in the `event` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewScan => "new-scan",
            Self::CardAdded => "add-card",
            Self::CardRemoved => "delete-card",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical pub/sub channel name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from a channel name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable description of one committed mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    kind: EventKind,
    payload: Map<String, Value>,
    occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event from an arbitrary payload object.
    ///
    /// `event` and `occurredAt` are reserved envelope keys; payload entries
    /// with those names are discarded.
    pub fn new(kind: EventKind, mut payload: Map<String, Value>, occurred_at: DateTime<Utc>) -> Self {
        let _ = payload.remove("event");
        let _ = payload.remove("occurredAt");
        Self {
            kind,
            payload,
            occurred_at,
        }
    }

    /// A scan was recorded.
    pub fn new_scan(entry: &ScanEntry) -> Self {
        let mut payload = Map::new();
        let entry = serde_json::to_value(entry).unwrap_or(Value::Null);
        let _ = payload.insert("newEntry".into(), entry);
        Self::new(EventKind::NewScan, payload, Utc::now())
    }

    /// A card was added to the valid set.
    pub fn card_added(card: &str) -> Self {
        Self::card_event(EventKind::CardAdded, card)
    }

    /// A card was removed from the valid set.
    pub fn card_removed(card: &str) -> Self {
        Self::card_event(EventKind::CardRemoved, card)
    }

    fn card_event(kind: EventKind, card: &str) -> Self {
        let mut payload = Map::new();
        let _ = payload.insert("card".into(), Value::String(card.to_owned()));
        Self::new(kind, payload, Utc::now())
    }

    /// Kind of mutation.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Event-specific fields.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// When the mutation was committed.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Build the wire envelope.
    pub fn to_envelope(&self) -> Value {
        let mut obj = Map::with_capacity(self.payload.len() + 2);
        let _ = obj.insert("event".into(), Value::String(self.kind.as_str().into()));
        for (k, v) in &self.payload {
            let _ = obj.insert(k.clone(), v.clone());
        }
        let _ = obj.insert(
            "occurredAt".into(),
            Value::String(self.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(obj)
    }

    /// Serialize the wire envelope to JSON text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_envelope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn kind_discriminators() {
        assert_eq!(EventKind::NewScan.as_str(), "new-scan");
        assert_eq!(EventKind::CardAdded.as_str(), "add-card");
        assert_eq!(EventKind::CardRemoved.as_str(), "delete-card");
    }

    #[test]
    fn kind_serde_matches_discriminator() {
        for kind in [EventKind::NewScan, EventKind::CardAdded, EventKind::CardRemoved] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn card_added_envelope() {
        let event = ChangeEvent::card_added("A1B2");
        let env = event.to_envelope();
        assert_eq!(env["event"], "add-card");
        assert_eq!(env["card"], "A1B2");
        assert!(env["occurredAt"].is_string());
        assert_eq!(env.as_object().unwrap().len(), 3);
    }

    #[test]
    fn card_removed_envelope() {
        let env = ChangeEvent::card_removed("FF00").to_envelope();
        assert_eq!(env["event"], "delete-card");
        assert_eq!(env["card"], "FF00");
    }

    #[test]
    fn new_scan_carries_entry() {
        let entry = ScanEntry::at("A1B2", false, fixed_time());
        let event = ChangeEvent::new_scan(&entry);
        assert_eq!(event.kind(), EventKind::NewScan);
        let env = event.to_envelope();
        assert_eq!(env["event"], "new-scan");
        assert_eq!(env["newEntry"]["enteredKey"], "A1B2");
        assert_eq!(env["newEntry"]["success"], false);
        assert_eq!(env["newEntry"]["time"], "2024-05-01T08:30:00.000Z");
    }

    #[test]
    fn reserved_keys_cannot_be_overridden() {
        let mut payload = Map::new();
        let _ = payload.insert("event".into(), Value::String("spoofed".into()));
        let _ = payload.insert("occurredAt".into(), Value::String("never".into()));
        let _ = payload.insert("card".into(), Value::String("X".into()));
        let event = ChangeEvent::new(EventKind::CardAdded, payload, fixed_time());
        let env = event.to_envelope();
        assert_eq!(env["event"], "add-card");
        assert_eq!(env["occurredAt"], "2024-05-01T08:30:00.000Z");
        assert_eq!(env["card"], "X");
    }

    #[test]
    fn to_json_is_single_line_object() {
        let json = ChangeEvent::card_added("A1B2").to_json().unwrap();
        assert!(json.starts_with('{'));
        assert!(!json.contains('\n'));
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["card"], "A1B2");
    }

    #[test]
    fn default_topic_name() {
        assert_eq!(Topic::default().as_str(), "db-change");
        assert_eq!(Topic::new("x").to_string(), "x");
    }
}
