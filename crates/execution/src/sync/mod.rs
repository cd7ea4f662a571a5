//! State synchronization with on-chain data.
//!
//! Provides a consistent board view via:
//! - Authoritative seeds from contract reads
//! - Live `NewPunch` subscriptions
//! - Reconciliation into immutable snapshots

mod event_subscriber;
mod reconciler;
mod snapshot;

pub use event_subscriber::*;
pub use reconciler::*;
pub use snapshot::*;
