pub mod log_entry;
pub mod notification;

pub use log_entry::{DeviceScope, EntryId, LogEntry};
pub use notification::NotificationStatus;
