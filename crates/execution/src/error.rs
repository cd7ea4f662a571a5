//! Error taxonomy surfaced by the session.

use crate::sync::EmissionError;
use punch_domain::ChainId;
use punch_protocols::punch::{ReadError, WriteError};
use punch_protocols::rpc::RpcError;
use punch_protocols::wallet::ProviderError;
use thiserror::Error;

/// Errors surfaced to the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No wallet, no account, or the wallet refused the request.
    #[error("wallet unavailable: {0}")]
    ProviderUnavailable(String),
    /// The user dismissed a connection or signature prompt.
    #[error("request declined by user")]
    UserDeclined,
    /// The node could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    /// A contract call or transaction reverted.
    #[error("contract reverted: {0}")]
    ContractReverted(String),
    /// A live emission could not be normalized.
    #[error("malformed emission: {0}")]
    MalformedEmission(String),
    /// The wallet is on another chain.
    #[error("wrong network: expected {expected}, wallet is on {actual}")]
    WrongNetwork {
        /// Chain the contract lives on.
        expected: ChainId,
        /// Chain the wallet reports.
        actual: ChainId,
    },
    /// The message is empty or too long.
    #[error("invalid message: {0}")]
    InvalidPayload(String),
    /// The account cannot pay for gas.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    /// The node refused the transaction.
    #[error("transaction rejected: {0}")]
    NetworkRejected(String),
}

impl SyncError {
    /// Whether the error is expected user behaviour and needs no notice.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::UserDeclined)
    }
}

impl From<ProviderError> for SyncError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NoProviderAvailable => {
                Self::ProviderUnavailable("no wallet provider available".into())
            }
            ProviderError::UserRejected => Self::UserDeclined,
            ProviderError::Rpc(RpcError::Unreachable(msg)) => Self::NetworkUnavailable(msg),
            ProviderError::Rpc(rpc) => Self::ProviderUnavailable(rpc.to_string()),
            ProviderError::InvalidResponse(msg) => Self::ProviderUnavailable(msg),
        }
    }
}

impl From<ReadError> for SyncError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::NetworkUnavailable(msg) => Self::NetworkUnavailable(msg),
            ReadError::ContractCallFailed(msg) => Self::ContractReverted(msg),
        }
    }
}

impl From<WriteError> for SyncError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::ProviderUnavailable(msg) => Self::ProviderUnavailable(msg),
            WriteError::UserRejected => Self::UserDeclined,
            WriteError::InsufficientFunds(msg) => Self::InsufficientFunds(msg),
            WriteError::NetworkRejected(msg) => Self::NetworkRejected(msg),
            WriteError::Reverted { tx_hash } => Self::ContractReverted(match tx_hash {
                Some(hash) => format!("transaction {hash:?} reverted"),
                None => "transaction would revert".to_string(),
            }),
            WriteError::WrongNetwork { expected, actual } => Self::WrongNetwork { expected, actual },
            WriteError::InvalidPayload(msg) => Self::InvalidPayload(msg),
        }
    }
}

impl From<EmissionError> for SyncError {
    fn from(error: EmissionError) -> Self {
        Self::MalformedEmission(error.to_string())
    }
}
