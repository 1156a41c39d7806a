use std::collections::VecDeque;

use serde::Serialize;

use crate::models::{DeviceScope, EntryId, LogEntry, NotificationStatus};

/// An entry as shown on screen together with its notification outcome.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedEntry {
    pub entry: LogEntry,
    pub status: NotificationStatus,
    pub status_text: String,
}

impl DisplayedEntry {
    fn new(entry: LogEntry) -> Self {
        Self {
            entry,
            status: NotificationStatus::None,
            status_text: String::new(),
        }
    }

    fn set_status(&mut self, status: NotificationStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status_text = status.to_string();
        self.status = status;
        true
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySnapshot {
    pub revision: u64,
    pub scope: DeviceScope,
    pub spotlight: Option<DisplayedEntry>,
    /// Newest first.
    pub queue: Vec<DisplayedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Rejected,
    Accepted { demoted: Option<EntryId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScopeChange {
    pub changed: bool,
    pub removed_spotlight: Option<EntryId>,
    pub removed_queued: usize,
}

/// Spotlight + recent-history queue. Holds no locks or timers; the
/// controller owns both.
#[derive(Debug, Default)]
pub struct DisplayState {
    spotlight: Option<DisplayedEntry>,
    /// Ordered by enqueue time, newest at the front.
    queue: VecDeque<DisplayedEntry>,
    scope: DeviceScope,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> &DeviceScope {
        &self.scope
    }

    pub fn spotlight_id(&self) -> Option<EntryId> {
        self.spotlight.as_ref().map(|shown| shown.entry.id)
    }

    pub fn queue_ids(&self) -> Vec<EntryId> {
        self.queue.iter().map(|shown| shown.entry.id).collect()
    }

    pub fn push(&mut self, entry: LogEntry, capacity: usize) -> PushOutcome {
        if !self.scope.matches(&entry) {
            return PushOutcome::Rejected;
        }

        let id = entry.id;
        self.queue.retain(|shown| shown.entry.id != id);

        let demoted = match self.spotlight.take() {
            Some(previous) if previous.entry.id != id => {
                let previous_id = previous.entry.id;
                self.enqueue(previous);
                Some(previous_id)
            }
            _ => None,
        };

        self.spotlight = Some(DisplayedEntry::new(entry));
        self.enforce_capacity(capacity);
        PushOutcome::Accepted { demoted }
    }

    /// Moves `id` out of the spotlight if it is still there. Entries the
    /// current scope no longer matches are dropped instead of queued.
    pub fn demote(&mut self, id: EntryId, capacity: usize) -> bool {
        if self.spotlight_id() != Some(id) {
            return false;
        }
        if let Some(shown) = self.spotlight.take() {
            if self.scope.matches(&shown.entry) {
                self.enqueue(shown);
                self.enforce_capacity(capacity);
            }
        }
        true
    }

    pub fn set_scope(&mut self, scope: DeviceScope) -> ScopeChange {
        if scope == self.scope {
            return ScopeChange::default();
        }
        self.scope = scope;

        let spotlight_excluded = self
            .spotlight
            .as_ref()
            .is_some_and(|shown| !self.scope.matches(&shown.entry));
        let removed_spotlight = if spotlight_excluded {
            self.spotlight.take().map(|shown| shown.entry.id)
        } else {
            None
        };

        let before = self.queue.len();
        let scope = &self.scope;
        self.queue.retain(|shown| scope.matches(&shown.entry));

        ScopeChange {
            changed: true,
            removed_spotlight,
            removed_queued: before - self.queue.len(),
        }
    }

    pub fn record_status(&mut self, id: EntryId, status: NotificationStatus) -> bool {
        if let Some(shown) = self.spotlight.as_mut().filter(|shown| shown.entry.id == id) {
            return shown.set_status(status);
        }
        self.queue
            .iter_mut()
            .find(|shown| shown.entry.id == id)
            .map(|shown| shown.set_status(status))
            .unwrap_or(false)
    }

    /// Removes the oldest-enqueued in-scope items until at most `capacity`
    /// remain. Returns how many were evicted.
    pub fn enforce_capacity(&mut self, capacity: usize) -> usize {
        let mut in_scope = self.queue_len_in_scope();
        let mut evicted = 0;

        while in_scope > capacity {
            let scope = &self.scope;
            let oldest = self
                .queue
                .iter()
                .rposition(|shown| scope.matches(&shown.entry));

            match oldest.and_then(|index| self.queue.remove(index)) {
                Some(_) => {
                    in_scope -= 1;
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    pub fn queue_len_in_scope(&self) -> usize {
        self.queue
            .iter()
            .filter(|shown| self.scope.matches(&shown.entry))
            .count()
    }

    /// Empties spotlight and queue, returning the spotlight id if there was one.
    pub fn clear(&mut self) -> Option<EntryId> {
        self.queue.clear();
        self.spotlight.take().map(|shown| shown.entry.id)
    }

    pub fn is_empty(&self) -> bool {
        self.spotlight.is_none() && self.queue.is_empty()
    }

    pub fn snapshot(&self, revision: u64) -> DisplaySnapshot {
        DisplaySnapshot {
            revision,
            scope: self.scope.clone(),
            spotlight: self.spotlight.clone(),
            queue: self.queue.iter().cloned().collect(),
        }
    }

    fn enqueue(&mut self, shown: DisplayedEntry) {
        self.queue.push_front(shown);
    }
}
