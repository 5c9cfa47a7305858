//! Scan-history records.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One card scan attempt, as stored in the history and sent to viewers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    /// The key code presented at the reader.
    pub entered_key: String,
    /// Whether the key matched a valid card.
    pub success: bool,
    /// When the scan was recorded (RFC 3339, millisecond precision).
    pub time: String,
}

impl ScanEntry {
    /// Build an entry stamped with the current time.
    pub fn now(entered_key: impl Into<String>, success: bool) -> Self {
        Self::at(entered_key, success, Utc::now())
    }

    /// Build an entry stamped with `time`.
    pub fn at(entered_key: impl Into<String>, success: bool, time: DateTime<Utc>) -> Self {
        Self {
            entered_key: entered_key.into(),
            success,
            time: time.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_field_names_are_camel_case() {
        let entry = ScanEntry::at("A1B2", true, Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["enteredKey"], "A1B2");
        assert_eq!(json["success"], true);
        assert_eq!(json["time"], "2024-05-01T08:30:00.000Z");
    }

    #[test]
    fn now_uses_utc_suffix() {
        let entry = ScanEntry::now("k", false);
        assert!(entry.time.ends_with('Z'));
        assert!(!entry.success);
    }
}
