use std::{collections::HashMap, sync::Arc, time::Duration};

use log::debug;
use tokio::{
    sync::{watch, Mutex},
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    models::{DeviceScope, EntryId, LogEntry, NotificationStatus},
    settings::SettingsStore,
};

use super::state::{DisplaySnapshot, DisplayState, PushOutcome};

struct Guarded {
    state: DisplayState,
    demotions: HashMap<EntryId, CancellationToken>,
    revision: u64,
    disposed: bool,
}

impl Guarded {
    fn cancel_demotion(&mut self, id: EntryId) {
        if let Some(token) = self.demotions.remove(&id) {
            token.cancel();
        }
    }
}

struct Inner {
    guarded: Mutex<Guarded>,
    settings: Arc<SettingsStore>,
    changes: watch::Sender<u64>,
    shutdown: CancellationToken,
}

/// Single owner of the live display. Every mutation takes the one lock,
/// bumps the revision and wakes subscribers; readers get snapshots.
#[derive(Clone)]
pub struct DisplayController {
    inner: Arc<Inner>,
}

impl DisplayController {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                guarded: Mutex::new(Guarded {
                    state: DisplayState::new(),
                    demotions: HashMap::new(),
                    revision: 0,
                    disposed: false,
                }),
                settings,
                changes,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Receives the revision number after every change. Consumers re-read
    /// [`DisplayController::snapshot`].
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    pub async fn snapshot(&self) -> DisplaySnapshot {
        let guard = self.inner.guarded.lock().await;
        guard.state.snapshot(guard.revision)
    }

    /// Installs `entry` as spotlight. Returns false when the scope filter
    /// rejects it or the controller is disposed.
    pub async fn push(&self, entry: LogEntry) -> bool {
        let settings = self.inner.settings.snapshot();
        let id = entry.id;

        let mut guard = self.inner.guarded.lock().await;
        if guard.disposed {
            return false;
        }

        match guard
            .state
            .push(entry, settings.queue_capacity)
        {
            PushOutcome::Rejected => {
                debug!("Entry {id} rejected by scope {:?}", guard.state.scope());
                false
            }
            PushOutcome::Accepted { demoted } => {
                if let Some(previous) = demoted {
                    guard.cancel_demotion(previous);
                }
                guard.cancel_demotion(id);

                let token = self.inner.shutdown.child_token();
                guard.demotions.insert(id, token.clone());
                self.schedule_demotion(id, settings.highlight(), token);

                self.notify(&mut guard);
                true
            }
        }
    }

    pub async fn update_scope(&self, scope: DeviceScope) -> bool {
        let mut guard = self.inner.guarded.lock().await;
        if guard.disposed {
            return false;
        }

        let change = guard.state.set_scope(scope);
        if let Some(removed) = change.removed_spotlight {
            guard.cancel_demotion(removed);
        }
        if change.changed {
            debug!(
                "Scope now {:?}; removed spotlight {:?} and {} queued",
                guard.state.scope(),
                change.removed_spotlight,
                change.removed_queued
            );
            self.notify(&mut guard);
        }
        change.changed
    }

    pub async fn record_status(&self, id: EntryId, status: NotificationStatus) -> bool {
        let mut guard = self.inner.guarded.lock().await;
        if guard.disposed {
            return false;
        }
        let changed = guard.state.record_status(id, status);
        if changed {
            self.notify(&mut guard);
        }
        changed
    }

    /// Drops everything on screen, e.g. when polling is suspended.
    pub async fn clear(&self) {
        let mut guard = self.inner.guarded.lock().await;
        if guard.disposed || guard.state.is_empty() {
            return;
        }
        guard.state.clear();
        for (_, token) in guard.demotions.drain() {
            token.cancel();
        }
        self.notify(&mut guard);
    }

    /// Cancels all pending demotions. No demotion fires afterwards and
    /// further mutations are ignored.
    pub async fn dispose(&self) {
        let mut guard = self.inner.guarded.lock().await;
        guard.disposed = true;
        guard.demotions.clear();
        self.inner.shutdown.cancel();
    }

    pub async fn pending_demotions(&self) -> usize {
        self.inner.guarded.lock().await.demotions.len()
    }

    fn schedule_demotion(&self, id: EntryId, delay: Duration, token: CancellationToken) {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => controller.demote_expired(id, &token).await,
            }
        });
    }

    async fn demote_expired(&self, id: EntryId, token: &CancellationToken) {
        let capacity = self.inner.settings.snapshot().queue_capacity;

        let mut guard = self.inner.guarded.lock().await;
        if guard.disposed || token.is_cancelled() {
            return;
        }
        guard.demotions.remove(&id);

        if guard.state.demote(id, capacity) {
            debug!("Entry {id} left the spotlight");
            self.notify(&mut guard);
        }
    }

    fn notify(&self, guard: &mut Guarded) {
        guard.revision += 1;
        self.inner.changes.send_replace(guard.revision);
    }
}
