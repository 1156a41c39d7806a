use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

const MIN_POLL_INTERVAL_MS: u64 = 100;
const MIN_HIGHLIGHT_MS: u64 = 100;
const MIN_TIMEOUT_MS: u64 = 100;
const MIN_RETENTION_SECS: u64 = 1;

pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "{PERSONNEL.LASTNAME}, {PERSONNEL.FIRSTNAME} has {IN or OUT} on {LOGDATE} {LOGTIME}";

/// Line parameters for the modem session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModemSettings {
    /// `host:port` of the serial-over-IP gateway the modem sits behind.
    pub address: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: String,
    pub stop_bits: u8,
    pub handshake: String,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Upper bound on waiting for the final OK/ERROR after the message body.
    pub response_timeout_ms: u64,
    pub line_terminator: String,
}

impl Default for ModemSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7000".into(),
            baud_rate: 9600,
            data_bits: 8,
            parity: "None".into(),
            stop_bits: 1,
            handshake: "None".into(),
            read_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            response_timeout_ms: 20_000,
            line_terminator: "\r".into(),
        }
    }
}

impl ModemSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Every knob the poller, display and dispatcher read while running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_ms: u64,
    /// How far back the first poll after activation reaches.
    pub lookback_secs: u64,
    pub max_rows_per_poll: usize,
    pub highlight_ms: u64,
    pub queue_capacity: usize,
    pub seen_retention_secs: u64,
    pub message_template: String,
    pub notifications_enabled: bool,
    /// Dispatches allowed in flight or waiting for the modem; read at startup.
    pub max_pending_notifications: usize,
    /// When false the watermark survives a deactivate/activate cycle.
    pub reset_watermark_on_activate: bool,
    pub modem: ModemSettings,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            lookback_secs: 3,
            max_rows_per_poll: 50,
            highlight_ms: 5_000,
            queue_capacity: 20,
            seen_retention_secs: 60,
            message_template: DEFAULT_MESSAGE_TEMPLATE.into(),
            notifications_enabled: true,
            max_pending_notifications: 16,
            reset_watermark_on_activate: true,
            modem: ModemSettings::default(),
        }
    }
}

impl MonitorSettings {
    /// Clamps values that would stall or spin the background loops.
    pub fn normalized(mut self) -> Self {
        self.poll_interval_ms = self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        self.highlight_ms = self.highlight_ms.max(MIN_HIGHLIGHT_MS);
        self.max_rows_per_poll = self.max_rows_per_poll.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.max_pending_notifications = self.max_pending_notifications.max(1);
        self.seen_retention_secs = self.seen_retention_secs.max(MIN_RETENTION_SECS);
        self.modem.read_timeout_ms = self.modem.read_timeout_ms.max(MIN_TIMEOUT_MS);
        self.modem.write_timeout_ms = self.modem.write_timeout_ms.max(MIN_TIMEOUT_MS);
        self.modem.response_timeout_ms = self.modem.response_timeout_ms.max(MIN_TIMEOUT_MS);
        if self.modem.line_terminator.is_empty() {
            self.modem.line_terminator = "\r".into();
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn highlight(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }

    pub fn seen_retention(&self) -> Duration {
        Duration::from_secs(self.seen_retention_secs)
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<MonitorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                MonitorSettings::default()
            })
        } else {
            MonitorSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// A store that never touches disk.
    pub fn ephemeral(settings: MonitorSettings) -> Self {
        Self {
            path: None,
            data: RwLock::new(settings),
        }
    }

    pub fn snapshot(&self) -> MonitorSettings {
        self.read().clone().normalized()
    }

    /// Applies `change` to the current settings and persists the result.
    pub fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut MonitorSettings),
    {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)
    }

    fn persist(&self, data: &MonitorSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_degenerate_values() {
        let settings = MonitorSettings {
            poll_interval_ms: 0,
            highlight_ms: 0,
            max_rows_per_poll: 0,
            queue_capacity: 0,
            seen_retention_secs: 0,
            max_pending_notifications: 0,
            ..MonitorSettings::default()
        }
        .normalized();

        assert_eq!(settings.poll_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(settings.highlight_ms, MIN_HIGHLIGHT_MS);
        assert_eq!(settings.max_rows_per_poll, 1);
        assert_eq!(settings.queue_capacity, 1);
        assert_eq!(settings.seen_retention_secs, MIN_RETENTION_SECS);
        assert_eq!(settings.max_pending_notifications, 1);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let parsed: MonitorSettings =
            serde_json::from_str(r#"{ "poll_interval_ms": 250, "modem": { "baud_rate": 115200 } }"#)
                .unwrap();
        assert_eq!(parsed.poll_interval_ms, 250);
        assert_eq!(parsed.modem.baud_rate, 115200);
        assert_eq!(parsed.modem.line_terminator, "\r");
        assert_eq!(parsed.queue_capacity, 20);
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store.modify(|s| s.highlight_ms = 1_500).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.snapshot().highlight_ms, 1_500);
    }

    #[test]
    fn unreadable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.snapshot(), MonitorSettings::default());
    }
}
