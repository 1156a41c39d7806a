use std::{sync::Arc, time::Duration};

use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::settings::SettingsStore;

use super::{ChangePoller, PollingGate};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

fn build_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Drives `poller` until `cancel_token` fires. Settings are re-read every
/// iteration; the ticker is only rebuilt when the interval changes.
pub async fn poll_loop(
    mut poller: ChangePoller,
    settings: Arc<SettingsStore>,
    gate: Arc<PollingGate>,
    cancel_token: CancellationToken,
) {
    let mut period = settings.snapshot().poll_interval();
    let mut ticker = build_ticker(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = settings.snapshot();

                match poller.tick(gate.state(), &snapshot).await {
                    Ok(Some(report)) if report.fetched > 0 => {
                        log_debug!(
                            "poll fetched {} rows: {} accepted, {} duplicate, {} filtered",
                            report.fetched, report.accepted, report.duplicates, report.filtered
                        );
                    }
                    Ok(_) => {}
                    Err(err) => log_error!("access log poll failed: {err:#}"),
                }

                let configured = snapshot.poll_interval();
                if configured != period {
                    log_info!("poll interval changed {:?} -> {:?}", period, configured);
                    period = configured;
                    ticker = build_ticker(period);
                    // A fresh interval fires at once; wait a full period instead.
                    ticker.reset();
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("poll loop shutting down");
                break;
            }
        }
    }
}
