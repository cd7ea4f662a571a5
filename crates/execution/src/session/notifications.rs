//! One-shot notices for the view layer.

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    /// Something the user asked for happened.
    Info,
    /// Something the user asked for failed.
    Error,
}

/// A one-shot notice, shown once and then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID.
    pub id: String,
    /// Severity.
    pub level: NotificationLevel,
    /// Human-readable text.
    pub message: String,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates an informational notice.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    /// Creates an error notice, or `None` for errors shown silently.
    pub fn from_error(error: &SyncError) -> Option<Self> {
        if error.is_silent() {
            return None;
        }
        Some(Self::new(NotificationLevel::Error, error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_is_silent() {
        assert!(Notification::from_error(&SyncError::UserDeclined).is_none());

        let notice =
            Notification::from_error(&SyncError::InsufficientFunds("gas".into())).unwrap();
        assert_eq!(notice.level, NotificationLevel::Error);
        assert!(notice.message.contains("insufficient funds"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Notification::info("a").id, Notification::info("a").id);
    }
}
