//! Access-log data model.
//!
//! A `LogEntry` is one turnstile/device swipe joined with the subject and
//! device reference data. Entries are immutable once built; the display
//! keeps notification status beside them rather than inside them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type EntryId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: EntryId,
    /// Local wall-clock time recorded by the device.
    pub timestamp: NaiveDateTime,
    /// Free-form kind text, conventionally "IN", "OUT" or a device label.
    pub event_kind: String,
    pub subject_ref: String,
    pub last_name: String,
    pub first_name: String,
    pub device_id: String,
    pub device_name: String,
    pub verify_mode: String,
    pub event_text: Option<String>,
    pub location: Option<String>,
    pub photo: Option<String>,
}

impl LogEntry {
    pub fn display_name(&self) -> String {
        match (self.last_name.is_empty(), self.first_name.is_empty()) {
            (false, false) => format!("{}, {}", self.last_name, self.first_name),
            (false, true) => self.last_name.clone(),
            (true, false) => self.first_name.clone(),
            (true, true) => self.subject_ref.clone(),
        }
    }
}

/// Device filter applied to the live display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", tag = "kind", content = "deviceId")]
pub enum DeviceScope {
    #[default]
    All,
    Device(String),
}

impl DeviceScope {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            DeviceScope::All => true,
            DeviceScope::Device(device_id) => entry.device_id == *device_id,
        }
    }
}
