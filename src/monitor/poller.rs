use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime};
use tokio::time::{self, Instant};

use crate::{
    display::DisplayController,
    notify::NotificationDispatcher,
    settings::MonitorSettings,
};

use super::{GateState, LogSource, SeenCache, Watermark};

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

const MIN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub filtered: usize,
}

/// Incremental reader of the access log. Owns the watermark and seen-id
/// cache; one instance is driven by exactly one loop, so polls never overlap.
pub struct ChangePoller {
    source: Arc<dyn LogSource>,
    display: DisplayController,
    dispatcher: NotificationDispatcher,
    clock: Clock,
    watermark: Option<Watermark>,
    seen: SeenCache,
    activations: u64,
}

impl ChangePoller {
    pub fn new(
        source: Arc<dyn LogSource>,
        display: DisplayController,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self::with_clock(
            source,
            display,
            dispatcher,
            Arc::new(|| Local::now().naive_local()),
        )
    }

    pub fn with_clock(
        source: Arc<dyn LogSource>,
        display: DisplayController,
        dispatcher: NotificationDispatcher,
        clock: Clock,
    ) -> Self {
        Self {
            source,
            display,
            dispatcher,
            clock,
            watermark: None,
            seen: SeenCache::new(MonitorSettings::default().seen_retention()),
            activations: 0,
        }
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.watermark
    }

    pub fn seen(&self) -> &SeenCache {
        &self.seen
    }

    /// Reacts to gate transitions. Returns true when the watermark was reset.
    /// The seen cache survives, so rows re-read through the lookback window
    /// are not delivered twice.
    pub fn sync_gate(&mut self, gate: GateState, settings: &MonitorSettings) -> bool {
        if gate.activations == self.activations {
            return false;
        }
        self.activations = gate.activations;

        if settings.reset_watermark_on_activate && self.watermark.is_some() {
            self.watermark = None;
            log::info!(
                "Polling position reset; next poll starts {}s back",
                settings.lookback_secs
            );
            true
        } else {
            false
        }
    }

    /// One gated tick: skips entirely while the gate is closed.
    pub async fn tick(&mut self, gate: GateState, settings: &MonitorSettings) -> Result<Option<PollReport>> {
        self.sync_gate(gate, settings);
        if !gate.active {
            return Ok(None);
        }
        self.poll_once(settings).await.map(Some)
    }

    /// Fetches one page after the watermark and forwards unseen rows.
    /// A failed fetch leaves all state untouched.
    pub async fn poll_once(&mut self, settings: &MonitorSettings) -> Result<PollReport> {
        let now = Instant::now();
        self.seen.set_retention(settings.seen_retention());
        self.seen.purge_expired(now);

        let watermark = match self.watermark {
            Some(watermark) => watermark,
            None => {
                let start = Watermark::starting_at((self.clock)(), settings.lookback());
                self.watermark = Some(start);
                start
            }
        };

        let fetch_timeout = settings.poll_interval().max(MIN_FETCH_TIMEOUT);
        let batch = time::timeout(
            fetch_timeout,
            self.source.fetch_after(watermark, settings.max_rows_per_poll),
        )
        .await
        .map_err(|_| anyhow!("access log fetch timed out after {fetch_timeout:?}"))??;

        let mut report = PollReport {
            fetched: batch.len(),
            ..PollReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut advanced = watermark;
        advanced.advance(&batch);
        self.watermark = Some(advanced);

        for entry in batch {
            if !self.seen.insert(entry.id, now) {
                report.duplicates += 1;
                continue;
            }
            if self.display.push(entry.clone()).await {
                report.accepted += 1;
                self.dispatcher.dispatch(entry);
            } else {
                report.filtered += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{DeviceScope, EntryId, LogEntry},
        notify::{ContactResolver, MessageTransport, TransportError},
        settings::{ModemSettings, SettingsStore},
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex as StdMutex;

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn row(id: EntryId, offset_secs: i64, device: &str) -> LogEntry {
        LogEntry {
            id,
            timestamp: base_time() + chrono::Duration::seconds(offset_secs),
            event_kind: "IN".into(),
            subject_ref: format!("P-{id}"),
            last_name: "Doe".into(),
            first_name: "Jane".into(),
            device_id: device.into(),
            device_name: device.into(),
            verify_mode: String::new(),
            event_text: None,
            location: None,
            photo: None,
        }
    }

    /// In-memory table honouring the watermark contract. Rows can be hidden
    /// until released to mimic late commits.
    #[derive(Default)]
    struct FakeSource {
        rows: StdMutex<Vec<LogEntry>>,
        fail_next: StdMutex<bool>,
        requests: StdMutex<Vec<Watermark>>,
        /// Returns every row regardless of watermark, like a broken query.
        ignore_watermark: bool,
    }

    impl FakeSource {
        fn add(&self, entry: LogEntry) {
            self.rows.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl LogSource for FakeSource {
        async fn fetch_after(&self, watermark: Watermark, limit: usize) -> Result<Vec<LogEntry>> {
            self.requests.lock().unwrap().push(watermark);
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(anyhow!("connection reset"));
            }
            let mut rows: Vec<LogEntry> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| self.ignore_watermark || watermark.admits(entry))
                .cloned()
                .collect();
            rows.sort_by_key(|entry| (entry.timestamp, entry.id));
            rows.truncate(limit);
            Ok(rows)
        }
    }

    struct NoContact;

    #[async_trait]
    impl ContactResolver for NoContact {
        async fn resolve(&self, _subject_ref: &str) -> Option<String> {
            None
        }
    }

    struct NeverSends;

    #[async_trait]
    impl MessageTransport for NeverSends {
        async fn send(
            &self,
            _number: &str,
            _body: &str,
            _settings: &ModemSettings,
        ) -> Result<String, TransportError> {
            Err(TransportError::Open {
                reason: "unused".into(),
            })
        }
    }

    fn settings(max_rows: usize) -> MonitorSettings {
        MonitorSettings {
            max_rows_per_poll: max_rows,
            lookback_secs: 3,
            highlight_ms: 60_000,
            queue_capacity: 100,
            notifications_enabled: false,
            ..MonitorSettings::default()
        }
    }

    fn poller(source: Arc<FakeSource>, settings: &MonitorSettings) -> (ChangePoller, DisplayController) {
        let store = Arc::new(SettingsStore::ephemeral(settings.clone()));
        let display = DisplayController::new(store.clone());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(NoContact),
            Arc::new(NeverSends),
            store,
            display.clone(),
        );
        let poller = ChangePoller::with_clock(source, display.clone(), dispatcher, Arc::new(base_time));
        (poller, display)
    }

    async fn shown_ids(display: &DisplayController) -> Vec<EntryId> {
        let snapshot = display.snapshot().await;
        let mut ids: Vec<EntryId> = snapshot.queue.iter().rev().map(|s| s.entry.id).collect();
        ids.extend(snapshot.spotlight.map(|s| s.entry.id));
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_starts_at_lookback() {
        let source = Arc::new(FakeSource::default());
        source.add(row(1, -10, "D1"));
        source.add(row(2, -2, "D1"));
        let settings = settings(50);
        let (mut poller, display) = poller(source.clone(), &settings);

        let report = poller.poll_once(&settings).await.unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(shown_ids(&display).await, vec![2]);
        assert_eq!(
            source.requests.lock().unwrap()[0],
            Watermark::new(base_time() - chrono::Duration::seconds(3), EntryId::MIN)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rows_sharing_a_timestamp_cross_the_page_boundary_once() {
        let source = Arc::new(FakeSource::default());
        source.add(row(10, 0, "D1"));
        source.add(row(11, 0, "D1"));
        source.add(row(12, 0, "D1"));
        let settings = settings(2);
        let (mut poller, display) = poller(source.clone(), &settings);

        poller.poll_once(&settings).await.unwrap();
        assert_eq!(poller.watermark(), Some(Watermark::new(base_time(), 11)));

        // A late row at the same timestamp with a higher id.
        source.add(row(13, 0, "D1"));
        poller.poll_once(&settings).await.unwrap();
        poller.poll_once(&settings).await.unwrap();

        assert_eq!(shown_ids(&display).await, vec![10, 11, 12, 13]);
    }

    #[tokio::test(start_paused = true)]
    async fn seen_cache_blocks_redelivery() {
        let source = Arc::new(FakeSource {
            ignore_watermark: true,
            ..FakeSource::default()
        });
        source.add(row(1, 0, "D1"));
        source.add(row(2, 1, "D1"));
        let settings = settings(50);
        let (mut poller, display) = poller(source, &settings);

        let first = poller.poll_once(&settings).await.unwrap();
        let second = poller.poll_once(&settings).await.unwrap();

        assert_eq!(first.accepted, 2);
        assert_eq!(second.duplicates, 2);
        assert_eq!(shown_ids(&display).await, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn seen_entries_expire_after_retention() {
        let source = Arc::new(FakeSource {
            ignore_watermark: true,
            ..FakeSource::default()
        });
        source.add(row(1, 0, "D1"));
        let settings = MonitorSettings {
            seen_retention_secs: 5,
            ..settings(50)
        };
        let (mut poller, _) = poller(source, &settings);

        poller.poll_once(&settings).await.unwrap();
        assert!(poller.seen().contains(1));
        time::sleep(Duration::from_secs(6)).await;
        let report = poller.poll_once(&settings).await.unwrap();
        // Purged, then seen again by this very poll.
        assert_eq!(report.accepted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_watermark() {
        let source = Arc::new(FakeSource::default());
        source.add(row(1, 0, "D1"));
        let settings = settings(50);
        let (mut poller, display) = poller(source.clone(), &settings);

        poller.poll_once(&settings).await.unwrap();
        let before = poller.watermark();

        source.add(row(2, 1, "D1"));
        *source.fail_next.lock().unwrap() = true;
        assert!(poller.poll_once(&settings).await.is_err());
        assert_eq!(poller.watermark(), before);

        poller.poll_once(&settings).await.unwrap();
        assert_eq!(shown_ids(&display).await, vec![1, 2]);
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[1], requests[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_rows_still_advance_the_watermark() {
        let source = Arc::new(FakeSource::default());
        source.add(row(1, 0, "D2"));
        source.add(row(2, 1, "D1"));
        let settings = settings(50);
        let (mut poller, display) = poller(source, &settings);
        display.update_scope(DeviceScope::Device("D1".into())).await;

        let report = poller.poll_once(&settings).await.unwrap();

        assert_eq!(report.filtered, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(poller.watermark(), Some(Watermark::new(base_time() + chrono::Duration::seconds(1), 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_gate_skips_fetch_and_reopening_resets_position() {
        let source = Arc::new(FakeSource::default());
        source.add(row(1, 0, "D1"));
        let settings = settings(50);
        let (mut poller, _) = poller(source.clone(), &settings);

        let open = GateState { active: true, activations: 1 };
        poller.tick(open, &settings).await.unwrap();
        assert!(poller.watermark().is_some());

        let closed = GateState { active: false, activations: 1 };
        assert_eq!(poller.tick(closed, &settings).await.unwrap(), None);
        assert_eq!(source.requests.lock().unwrap().len(), 1);

        let reopened = GateState { active: true, activations: 2 };
        assert!(poller.sync_gate(reopened, &settings));
        assert_eq!(poller.watermark(), None);
        assert!(poller.seen().contains(1));
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_the_gate_never_redelivers_rows_in_lookback() {
        let source = Arc::new(FakeSource::default());
        source.add(row(1, 0, "D1"));
        let settings = settings(50);
        let (mut poller, display) = poller(source.clone(), &settings);

        let first = poller
            .tick(GateState { active: true, activations: 1 }, &settings)
            .await
            .unwrap()
            .unwrap();
        poller
            .tick(GateState { active: false, activations: 1 }, &settings)
            .await
            .unwrap();
        let second = poller
            .tick(GateState { active: true, activations: 2 }, &settings)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.accepted + second.accepted, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(shown_ids(&display).await, vec![1]);

        // The position itself did rewind to the lookback start.
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn watermark_can_persist_across_gate_cycles() {
        let source = Arc::new(FakeSource::default());
        source.add(row(1, 0, "D1"));
        let settings = MonitorSettings {
            reset_watermark_on_activate: false,
            ..settings(50)
        };
        let (mut poller, _) = poller(source, &settings);

        poller.tick(GateState { active: true, activations: 1 }, &settings).await.unwrap();
        let kept = poller.watermark();
        assert!(!poller.sync_gate(GateState { active: true, activations: 2 }, &settings));
        assert_eq!(poller.watermark(), kept);
    }
}
