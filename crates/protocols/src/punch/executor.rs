//! Submission of `punch(string)` transactions.

use super::ContractConfig;
use super::abi::encode_punch_call;
use crate::rpc::RpcError;
use crate::wallet::{ProviderError, ProviderGateway, TransactionReceipt, TransactionRequest};
use primitive_types::H256;
use punch_domain::{ChainId, validate_payload};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// JSON-RPC code some nodes use for execution reverts.
const EXECUTION_REVERTED_CODE: i64 = 3;

/// Errors raised while submitting a punch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// No wallet, or no connected account.
    #[error("wallet unavailable: {0}")]
    ProviderUnavailable(String),
    /// The user declined the signature prompt.
    #[error("user rejected the transaction")]
    UserRejected,
    /// The account cannot pay for gas.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    /// The node refused the transaction.
    #[error("transaction rejected by network: {0}")]
    NetworkRejected(String),
    /// Execution reverted, before or after mining.
    #[error("transaction reverted (tx: {tx_hash:?})")]
    Reverted {
        /// Hash when the revert happened on chain.
        tx_hash: Option<H256>,
    },
    /// The wallet is on another chain.
    #[error("wrong network: expected {expected}, wallet is on {actual}")]
    WrongNetwork {
        /// Chain the contract lives on.
        expected: ChainId,
        /// Chain the wallet reports.
        actual: ChainId,
    },
    /// The message is empty or too long.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<ProviderError> for WriteError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NoProviderAvailable => {
                Self::ProviderUnavailable("no wallet provider available".into())
            }
            ProviderError::UserRejected => Self::UserRejected,
            ProviderError::Rpc(rpc) => classify_rpc_error(rpc),
            ProviderError::InvalidResponse(msg) => Self::NetworkRejected(msg),
        }
    }
}

fn classify_rpc_error(error: RpcError) -> WriteError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        WriteError::InsufficientFunds(message)
    } else if error.code() == Some(EXECUTION_REVERTED_CODE) || lower.contains("revert") {
        WriteError::Reverted { tx_hash: None }
    } else {
        WriteError::NetworkRejected(message)
    }
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Delay between receipt polls in milliseconds.
    pub receipt_poll_interval_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            receipt_poll_interval_ms: 2_000,
        }
    }
}

/// Submits punches through the connected wallet.
pub struct ContractWriter {
    /// Gateway owning the wallet connection.
    gateway: Arc<ProviderGateway>,
    /// Contract location.
    contract: ContractConfig,
    /// Polling configuration.
    config: WriterConfig,
}

impl ContractWriter {
    /// Creates a new writer.
    pub fn new(gateway: Arc<ProviderGateway>, contract: ContractConfig, config: WriterConfig) -> Self {
        Self {
            gateway,
            contract,
            config,
        }
    }

    /// Validates, signs and broadcasts a punch.
    ///
    /// Every precondition is checked before the wallet is asked to sign, so
    /// a failed check never opens a prompt.
    pub async fn send(&self, payload: &str) -> Result<PendingTransaction, WriteError> {
        if !self.gateway.is_available() {
            return Err(WriteError::ProviderUnavailable(
                "no wallet provider available".into(),
            ));
        }
        let from = self
            .gateway
            .current_account()
            .await?
            .ok_or_else(|| WriteError::ProviderUnavailable("no connected account".into()))?;

        let actual = self.gateway.current_chain().await?;
        if actual != self.contract.expected_chain {
            warn!(expected = %self.contract.expected_chain, actual = %actual, "Refusing to submit on wrong network");
            return Err(WriteError::WrongNetwork {
                expected: self.contract.expected_chain,
                actual,
            });
        }

        validate_payload(payload).map_err(|e| WriteError::InvalidPayload(e.to_string()))?;

        let request = TransactionRequest {
            from,
            to: self.contract.address,
            data: encode_punch_call(payload),
        };
        let tx_hash = self.gateway.send_transaction(&request).await?;
        info!(tx_hash = ?tx_hash, from = %from, "Punch submitted");

        Ok(PendingTransaction {
            gateway: self.gateway.clone(),
            tx_hash,
            poll_interval: Duration::from_millis(self.config.receipt_poll_interval_ms),
        })
    }

    /// Sends a punch and waits for it to be mined.
    pub async fn submit(&self, payload: &str) -> Result<TransactionReceipt, WriteError> {
        self.send(payload).await?.wait().await
    }
}

/// A broadcast transaction awaiting its receipt.
pub struct PendingTransaction {
    gateway: Arc<ProviderGateway>,
    tx_hash: H256,
    poll_interval: Duration,
}

impl PendingTransaction {
    /// Hash of the broadcast transaction.
    pub fn tx_hash(&self) -> H256 {
        self.tx_hash
    }

    /// Checks once for a receipt.
    ///
    /// Transport failures are reported as still pending.
    pub async fn poll_once(&self) -> Result<Option<TransactionReceipt>, WriteError> {
        let receipt = match self.gateway.transaction_receipt(self.tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(tx_hash = ?self.tx_hash, error = %e, "Receipt poll failed");
                return Ok(None);
            }
        };
        match receipt {
            Some(receipt) if !receipt.success => {
                warn!(tx_hash = ?self.tx_hash, block = receipt.block_number, "Punch reverted");
                Err(WriteError::Reverted {
                    tx_hash: Some(self.tx_hash),
                })
            }
            Some(receipt) => {
                info!(tx_hash = ?self.tx_hash, block = receipt.block_number, "Punch mined");
                Ok(Some(receipt))
            }
            None => {
                debug!(tx_hash = ?self.tx_hash, "Punch still pending");
                Ok(None)
            }
        }
    }

    /// Polls until the transaction is mined or reverts.
    pub async fn wait(self) -> Result<TransactionReceipt, WriteError> {
        loop {
            if let Some(receipt) = self.poll_once().await? {
                return Ok(receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
