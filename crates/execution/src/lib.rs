//! Live synchronization engine for the Punch board.
//!
//! This crate provides functionality for keeping a view model consistent:
//! - Reconciliation of seeds, live events and wallet state into snapshots
//! - A single live `NewPunch` subscription with deterministic teardown
//! - Session coordination for connect, submit and wallet changes
//! - One-shot notifications and a sink driver for the view layer

/// Prelude module for convenient imports.
pub mod prelude;

/// Error taxonomy.
pub mod error;
/// Session coordination.
pub mod session;
/// View model sink.
pub mod sink;
/// State synchronization.
pub mod sync;
