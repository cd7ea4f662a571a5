use thiserror::Error;

/// Errors raised while parsing or validating domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid account address: {0}")]
    InvalidAddress(String),
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("invalid hex quantity: {0}")]
    InvalidQuantity(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
