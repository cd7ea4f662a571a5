//! Protocol adapters for the Punch board.
//!
//! This crate owns every conversation with the outside world:
//! - JSON-RPC transport to a read-only node endpoint
//! - The EIP-1193 wallet boundary and the gateway wrapping it
//! - The punch contract ABI, reader and writer

/// Hex helpers shared by the JSON-RPC adapters.
pub mod codec;
/// Punch contract adapter.
pub mod punch;
/// JSON-RPC transport.
pub mod rpc;
/// Injected wallet boundary.
pub mod wallet;

/// In-memory wallet and node doubles.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::punch::{
        ContractConfig, ContractReader, ContractState, ContractWriter, PendingTransaction,
        RawEntry, ReadError, WriteError, WriterConfig,
    };
    pub use crate::rpc::{RpcConfig, RpcError, RpcProvider, RpcTransport};
    pub use crate::wallet::{
        GatewayEvents, ListenerHandle, LogFilter, LogSubscription, ProviderChange, ProviderError,
        ProviderGateway, SubscriptionMessage, TransactionReceipt, TransactionRequest, WalletEvent,
        WalletTransport,
    };
}
