//! Injected wallet boundary.
//!
//! Provides:
//! - The EIP-1193 transport trait implemented by the host binding
//! - A gateway that owns the wallet connection
//! - Log subscriptions with explicit teardown
//! - Transaction requests and receipts

mod eip1193;
mod gateway;
mod subscription;
mod transaction;

pub use eip1193::*;
pub use gateway::*;
pub use subscription::*;
pub use transaction::*;
