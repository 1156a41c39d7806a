use chrono::NaiveDateTime;
use serde::Serialize;
use std::time::Duration;

use crate::models::{EntryId, LogEntry};

/// Last consumed position in the access log. Field order gives the
/// `(timestamp, id)` ordering the log query pages by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub timestamp: NaiveDateTime,
    pub id: EntryId,
}

impl Watermark {
    pub fn new(timestamp: NaiveDateTime, id: EntryId) -> Self {
        Self { timestamp, id }
    }

    /// Starting position that admits every row at or after `now - lookback`.
    pub fn starting_at(now: NaiveDateTime, lookback: Duration) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::zero());
        let timestamp = now.checked_sub_signed(lookback).unwrap_or(now);
        Self {
            timestamp,
            id: EntryId::MIN,
        }
    }

    pub fn admits(&self, entry: &LogEntry) -> bool {
        (entry.timestamp, entry.id) > (self.timestamp, self.id)
    }

    /// Moves forward to the greatest `(timestamp, id)` in `batch`. Never moves back.
    pub fn advance(&mut self, batch: &[LogEntry]) -> bool {
        let Some(max) = batch
            .iter()
            .map(|entry| Watermark::new(entry.timestamp, entry.id))
            .max()
        else {
            return false;
        };

        if max > *self {
            *self = max;
            true
        } else {
            false
        }
    }
}
