//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use punch_execution::prelude::*;
//! ```

// Errors
pub use crate::error::SyncError;

// Session
pub use crate::session::{Notification, NotificationLevel, PunchSession, SessionConfig};

// Sink
pub use crate::sink::{ViewModelSink, drive_sink};

// Sync
pub use crate::sync::{
    ConnectAction, EmissionError, EventSubscriber, PendingPunch, Reconciler, SeedBatch,
    SeedTicket, SyncPhase, ViewSnapshot, explorer_address_url, normalize_log,
};
