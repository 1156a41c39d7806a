pub mod console;
pub mod db;
pub mod display;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod settings;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use db::{Database, GuardianContacts, PersonnelContacts};
use display::DisplayController;
use monitor::{ChangePoller, LogSource, PollerController, PollingGate};
use notify::{
    ContactResolver, DualSourceResolver, MessageTransport, ModemTransport,
    NotificationDispatcher, TcpModemConnector,
};
use settings::SettingsStore;

const DEFAULT_DB_PATH: &str = "gatewatch.sqlite3";
const DEFAULT_SETTINGS_PATH: &str = "gatewatch-settings.json";

/// The running monitor: poller, display, dispatcher and gate wired together.
pub struct Monitor {
    pub settings: Arc<SettingsStore>,
    pub display: DisplayController,
    pub dispatcher: NotificationDispatcher,
    pub gate: Arc<PollingGate>,
    poller: PollerController,
    background: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Starts polling `source` with the gate open.
    pub fn start(
        source: Arc<dyn LogSource>,
        resolver: Arc<dyn ContactResolver>,
        transport: Arc<dyn MessageTransport>,
        settings: Arc<SettingsStore>,
    ) -> Result<Self> {
        let display = DisplayController::new(settings.clone());
        let dispatcher =
            NotificationDispatcher::new(resolver, transport, settings.clone(), display.clone());
        let gate = Arc::new(PollingGate::new());
        let background = CancellationToken::new();

        let tasks = vec![
            console::spawn_console(display.clone(), background.child_token()),
            spawn_gate_watcher(&gate, display.clone(), background.child_token()),
        ];

        let poller = ChangePoller::new(source, display.clone(), dispatcher.clone());
        let mut controller = PollerController::new();
        controller.start(poller, settings.clone(), gate.clone())?;
        gate.try_activate();

        Ok(Self {
            settings,
            display,
            dispatcher,
            gate,
            poller: controller,
            background,
            tasks,
        })
    }

    /// Stops polling, cancels pending demotions and in-flight dispatches.
    pub async fn shutdown(mut self) -> Result<()> {
        self.gate.try_deactivate();
        self.poller.stop().await?;
        self.dispatcher.shutdown();
        self.display.dispose().await;
        self.background.cancel();
        for task in self.tasks.drain(..) {
            task.await.context("background task failed to join")?;
        }
        info!("Monitor stopped");
        Ok(())
    }
}

/// Clears the display whenever polling is suspended.
fn spawn_gate_watcher(
    gate: &PollingGate,
    display: DisplayController,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let mut states = gate.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let active = states.borrow_and_update().active;
                    if !active {
                        display.clear().await;
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    })
}

fn path_from_env(key: &str, default: &str) -> PathBuf {
    std::env::var_os(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

pub async fn run() -> Result<()> {
    // Reads RUST_LOG, defaulting to info.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("gatewatch starting up...");

    let settings_path = path_from_env("GATEWATCH_SETTINGS", DEFAULT_SETTINGS_PATH);
    let settings = Arc::new(SettingsStore::new(settings_path)?);

    let db_path = path_from_env("GATEWATCH_DB", DEFAULT_DB_PATH);
    let database = Database::new(db_path)?;

    let resolver = Arc::new(DualSourceResolver::new(
        Arc::new(PersonnelContacts(database.clone())),
        Arc::new(GuardianContacts(database.clone())),
    ));
    let transport = Arc::new(ModemTransport::new(TcpModemConnector));

    let monitor = Monitor::start(Arc::new(database), resolver, transport, settings)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    monitor.shutdown().await
}
