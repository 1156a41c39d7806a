use serde::{Deserialize, Serialize};
use std::fmt;

/// Human-readable outcome of a notification attempt, shown next to an entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum NotificationStatus {
    #[default]
    None,
    Pending,
    Sent { number: String },
    Failed { reason: String },
    NoContact,
    Disabled,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationStatus::None => Ok(()),
            NotificationStatus::Pending => write!(f, "Sending..."),
            NotificationStatus::Sent { number } => write!(f, "SMS sent to {number}"),
            NotificationStatus::Failed { reason } => write!(f, "SMS not sent: {reason}"),
            NotificationStatus::NoContact => write!(f, "SMS not sent: no contact number"),
            NotificationStatus::Disabled => write!(f, "SMS disabled"),
        }
    }
}
