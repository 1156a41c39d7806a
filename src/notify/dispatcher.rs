use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    display::DisplayController,
    models::{LogEntry, NotificationStatus},
    settings::SettingsStore,
};

use super::{contacts::ContactResolver, template, transport::MessageTransport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const BACKLOG_FULL: &str = "notification backlog full";

/// Best-effort SMS for each entry that reached the spotlight. Dispatches
/// run detached from polling; the outcome is written back onto the display.
#[derive(Clone)]
pub struct NotificationDispatcher {
    resolver: Arc<dyn ContactResolver>,
    transport: Arc<dyn MessageTransport>,
    settings: Arc<SettingsStore>,
    display: DisplayController,
    /// One modem, one session at a time.
    session: Arc<Mutex<()>>,
    /// Bounds dispatches that are running or queued on `session`.
    backlog: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl NotificationDispatcher {
    pub fn new(
        resolver: Arc<dyn ContactResolver>,
        transport: Arc<dyn MessageTransport>,
        settings: Arc<SettingsStore>,
        display: DisplayController,
    ) -> Self {
        let backlog = settings.snapshot().max_pending_notifications;
        Self {
            resolver,
            transport,
            settings,
            display,
            session: Arc::new(Mutex::new(())),
            backlog: Arc::new(Semaphore::new(backlog)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fire-and-forget: returns immediately. When the backlog is full the
    /// entry is marked failed instead of waiting for the modem.
    pub fn dispatch(&self, entry: LogEntry) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let id = entry.id;

        let Ok(permit) = self.backlog.clone().try_acquire_owned() else {
            log_warn!("Notification backlog full; entry {id} will not be notified");
            let display = self.display.clone();
            tokio::spawn(async move {
                let status = NotificationStatus::Failed {
                    reason: BACKLOG_FULL.into(),
                };
                display.record_status(id, status).await;
            });
            return;
        };

        let dispatcher = self.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = token.cancelled() => {
                    log_info!("Dispatch for entry {id} abandoned on shutdown");
                }
                status = dispatcher.deliver(&entry) => {
                    dispatcher.display.record_status(id, status).await;
                }
            }
        });
    }

    /// Runs one notification attempt to completion and returns its outcome.
    /// Progress is recorded on the display as it goes.
    pub async fn deliver(&self, entry: &LogEntry) -> NotificationStatus {
        let settings = self.settings.snapshot();
        if !settings.notifications_enabled {
            return NotificationStatus::Disabled;
        }

        self.display
            .record_status(entry.id, NotificationStatus::Pending)
            .await;

        let Some(number) = self.resolver.resolve(&entry.subject_ref).await else {
            log_info!("No contact number for {} (entry {})", entry.subject_ref, entry.id);
            return NotificationStatus::NoContact;
        };

        let body = template::render(&settings.message_template, entry);

        let _session = self.session.lock().await;
        match self.transport.send(&number, &body, &settings.modem).await {
            Ok(reply) => {
                log_info!("SMS for entry {} sent to {number}: {reply}", entry.id);
                NotificationStatus::Sent { number }
            }
            Err(err) => {
                log_warn!("SMS for entry {} to {number} failed: {err}", entry.id);
                NotificationStatus::Failed {
                    reason: err.raw_response(),
                }
            }
        }
    }

    /// Abandons in-flight dispatches and ignores new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
