pub mod controller;
pub mod gate;
pub mod loop_worker;
pub mod poller;
pub mod seen_cache;
pub mod source;
pub mod watermark;

pub use controller::PollerController;
pub use gate::{GateState, PollingGate};
pub use poller::{ChangePoller, PollReport};
pub use seen_cache::SeenCache;
pub use source::LogSource;
pub use watermark::Watermark;
