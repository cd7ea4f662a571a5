//! Page session wiring wallet, contract and reconciler together.

mod coordinator;
mod notifications;

pub use coordinator::*;
pub use notifications::*;

use punch_protocols::punch::{ContractConfig, WriterConfig};
use punch_protocols::rpc::RpcConfig;

/// Configuration for a [`PunchSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Read-only fallback endpoint.
    pub rpc: RpcConfig,
    /// Contract location.
    pub contract: ContractConfig,
    /// Transaction polling.
    pub writer: WriterConfig,
    /// Buffered notifications per listener.
    pub notification_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            contract: ContractConfig::default(),
            writer: WriterConfig::default(),
            notification_capacity: 64,
        }
    }
}
