//! Stand-in for a rendering layer: repaints (logs) the display whenever it
//! reports a change.

use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::display::{DisplayController, DisplaySnapshot};

pub fn describe(snapshot: &DisplaySnapshot) -> String {
    let spotlight = match &snapshot.spotlight {
        Some(shown) => format!(
            "{} {} at {} [{}] {}",
            shown.entry.display_name(),
            shown.entry.event_kind,
            shown.entry.device_name,
            shown.entry.timestamp.format("%H:%M:%S"),
            shown.status_text
        ),
        None => "-".to_string(),
    };
    format!(
        "#{} scope={:?} spotlight: {} | queue: {}",
        snapshot.revision,
        snapshot.scope,
        spotlight.trim_end(),
        snapshot.queue.len()
    )
}

pub fn spawn_console(display: DisplayController, cancel_token: CancellationToken) -> JoinHandle<()> {
    let mut changes = display.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    changes.borrow_and_update();
                    let snapshot = display.snapshot().await;
                    info!("{}", describe(&snapshot));
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    })
}
