use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::settings::SettingsStore;

use super::{loop_worker::poll_loop, ChangePoller, PollingGate};

/// Owns the background poll task.
pub struct PollerController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl PollerController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(
        &mut self,
        poller: ChangePoller,
        settings: Arc<SettingsStore>,
        gate: Arc<PollingGate>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("poller already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(poller, settings, gate, cancel_token.clone()));

        info!("Access log poller started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("poll loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for PollerController {
    fn default() -> Self {
        Self::new()
    }
}
