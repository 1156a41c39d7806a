pub mod controller;
pub mod state;

pub use controller::DisplayController;
pub use state::{DisplaySnapshot, DisplayState, DisplayedEntry};
