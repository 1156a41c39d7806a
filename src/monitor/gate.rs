use serde::Serialize;
use tokio::sync::watch;

/// Published on every actual gate transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateState {
    pub active: bool,
    /// Number of inactive → active transitions so far.
    pub activations: u64,
}

/// Suspends polling without stopping the process. Transitions are
/// edge-triggered: subscribers only hear about real changes.
pub struct PollingGate {
    state: watch::Sender<GateState>,
}

impl PollingGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self { state }
    }

    pub fn try_activate(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.active {
                return false;
            }
            state.active = true;
            state.activations += 1;
            true
        });
        if changed {
            log::info!("Polling activated");
        }
        changed
    }

    pub fn try_deactivate(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if !state.active {
                return false;
            }
            state.active = false;
            true
        });
        if changed {
            log::info!("Polling deactivated");
        }
        changed
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }
}

impl Default for PollingGate {
    fn default() -> Self {
        Self::new()
    }
}
