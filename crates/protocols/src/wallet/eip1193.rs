//! EIP-1193 provider surface.

use crate::rpc::RpcTransport;
use serde_json::Value;
use tokio::sync::broadcast;

/// The user rejected the request.
pub const USER_REJECTED_CODE: i64 = 4001;
/// The provider is disconnected from all chains.
pub const DISCONNECTED_CODE: i64 = 4900;
/// The provider is not connected to the requested chain.
pub const CHAIN_DISCONNECTED_CODE: i64 = 4901;

/// Wallet-state notification emitted by the injected provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// `accountsChanged`; an empty list means no authorized account.
    AccountsChanged(Vec<String>),
    /// `chainChanged` with the new hex chain id.
    ChainChanged(String),
    /// `disconnect`.
    Disconnect,
}

/// `message` notification of type `eth_subscription`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionMessage {
    /// Subscription id returned by `eth_subscribe`.
    pub subscription: String,
    /// Subscription payload.
    pub result: Value,
}

/// The injected wallet object.
///
/// `call` maps to `provider.request({ method, params })`. Wallet-state
/// events and subscription messages arrive on separate streams, so a
/// burst of logs cannot crowd out an account or chain change. Host
/// bindings (for example a `wasm-bindgen` wrapper around
/// `window.ethereum`) implement this trait.
pub trait WalletTransport: RpcTransport {
    /// Opens a new receiver for `accountsChanged`, `chainChanged` and
    /// `disconnect`.
    fn events(&self) -> broadcast::Receiver<WalletEvent>;

    /// Opens a new receiver for `eth_subscription` messages.
    fn messages(&self) -> broadcast::Receiver<SubscriptionMessage>;
}

/// Returns true when the error code means the user dismissed a prompt.
pub fn is_user_rejection(code: i64) -> bool {
    code == USER_REJECTED_CODE
}
