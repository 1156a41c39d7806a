use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::EntryId;

/// Ids already forwarded to the display, kept for a bounded retention window.
#[derive(Debug)]
pub struct SeenCache {
    retention: Duration,
    seen: HashMap<EntryId, Instant>,
}

impl SeenCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: HashMap::new(),
        }
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    /// Records `id`; returns false when it was already present.
    pub fn insert(&mut self, id: EntryId, now: Instant) -> bool {
        if self.seen.contains_key(&id) {
            return false;
        }
        self.seen.insert(id, now);
        true
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.seen.contains_key(&id)
    }

    /// Drops ids first seen longer than the retention window ago.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.seen.len();
        let retention = self.retention;
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) <= retention);
        before - self.seen.len()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
