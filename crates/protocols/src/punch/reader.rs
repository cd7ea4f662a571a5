//! Read-only access to punch board state.

use super::ContractConfig;
use super::abi::{
    self, GET_ALL_PUNCHES_SELECTOR, GET_TOTAL_PUNCHES_SELECTOR, RawEntry,
};
use crate::codec::{parse_hex_bytes, to_hex};
use crate::rpc::{RpcError, RpcTransport};
use crate::wallet::{CHAIN_DISCONNECTED_CODE, DISCONNECTED_CODE, ProviderGateway};
use punch_domain::Amount;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by contract reads. Neither is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The node could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    /// The call reverted, or its result did not match the ABI.
    #[error("contract call failed: {0}")]
    ContractCallFailed(String),
}

impl From<RpcError> for ReadError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Unreachable(msg) => Self::NetworkUnavailable(msg),
            RpcError::Rpc { code, message }
                if code == DISCONNECTED_CODE || code == CHAIN_DISCONNECTED_CODE =>
            {
                Self::NetworkUnavailable(message)
            }
            other => Self::ContractCallFailed(other.to_string()),
        }
    }
}

impl From<abi::AbiError> for ReadError {
    fn from(error: abi::AbiError) -> Self {
        Self::ContractCallFailed(error.to_string())
    }
}

/// Everything a seed needs, read in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractState {
    /// Value of `getTotalPunches()`.
    pub total_count: u64,
    /// Entries in contract order, oldest first.
    pub entries: Vec<RawEntry>,
    /// Native balance held by the contract.
    pub balance: Amount,
}

/// Reader for punch board state.
///
/// Reads go through the wallet when one is injected and sitting on the
/// contract's chain, and through the fallback endpoint otherwise.
pub struct ContractReader {
    /// Gateway owning the wallet connection.
    gateway: Arc<ProviderGateway>,
    /// Read-only endpoint used without a suitable wallet.
    fallback: Arc<dyn RpcTransport>,
    /// Contract location.
    config: ContractConfig,
}

impl ContractReader {
    /// Creates a new reader.
    pub fn new(
        gateway: Arc<ProviderGateway>,
        fallback: Arc<dyn RpcTransport>,
        config: ContractConfig,
    ) -> Self {
        Self {
            gateway,
            fallback,
            config,
        }
    }

    /// Reads `getTotalPunches()`.
    pub async fn read_total_count(&self) -> Result<u64, ReadError> {
        let data = self.eth_call(&GET_TOTAL_PUNCHES_SELECTOR).await?;
        let count = abi::decode_total_punches(&data)?;
        debug!(count = count, "Read total punch count");
        Ok(count)
    }

    /// Reads `getAllPunches()` in contract order, oldest first.
    pub async fn read_all_entries(&self) -> Result<Vec<RawEntry>, ReadError> {
        let data = self.eth_call(&GET_ALL_PUNCHES_SELECTOR).await?;
        let entries = abi::decode_all_punches(&data)?;
        debug!(entries = entries.len(), "Read all punches");
        Ok(entries)
    }

    /// Reads the contract's native balance.
    pub async fn read_balance(&self) -> Result<Amount, ReadError> {
        let result = self
            .call(
                "eth_getBalance",
                json!([self.config.address.to_string(), "latest"]),
            )
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ReadError::ContractCallFailed("balance is not a string".into()))?;
        let balance = Amount::from_hex_quantity(raw)
            .map_err(|e| ReadError::ContractCallFailed(e.to_string()))?;
        debug!(balance = %balance, "Read contract balance");
        Ok(balance)
    }

    /// Reads count, entries and balance concurrently.
    ///
    /// Fails as a whole if any of the three reads fails.
    pub async fn read_state(&self) -> Result<ContractState, ReadError> {
        let (total_count, entries, balance) = tokio::try_join!(
            self.read_total_count(),
            self.read_all_entries(),
            self.read_balance()
        )?;
        Ok(ContractState {
            total_count,
            entries,
            balance,
        })
    }

    async fn eth_call(&self, selector: &[u8; 4]) -> Result<Vec<u8>, ReadError> {
        let result = self
            .call(
                "eth_call",
                json!([
                    {
                        "to": self.config.address.to_string(),
                        "data": to_hex(selector),
                    },
                    "latest"
                ]),
            )
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ReadError::ContractCallFailed("eth_call result is not a string".into()))?;
        parse_hex_bytes(raw, "eth_call result").map_err(ReadError::ContractCallFailed)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ReadError> {
        let on_expected_chain =
            self.gateway.cached_chain().await == Some(self.config.expected_chain);
        let result = match self.gateway.wallet() {
            Ok(wallet) if on_expected_chain => {
                debug!(method = method, route = "wallet", "Contract read");
                wallet.call(method, params).await
            }
            _ => {
                debug!(method = method, route = "fallback", "Contract read");
                self.fallback.call(method, params).await
            }
        };
        result.map_err(|e| {
            warn!(method = method, error = %e, "Contract read failed");
            ReadError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, MockRpc, MockWallet};
    use punch_domain::{AccountId, ChainId};

    fn raw(byte: u8, ts: u64, payload: &str) -> RawEntry {
        RawEntry {
            author: AccountId::from_bytes([byte; 20]),
            occurred_at: ts,
            payload: payload.to_string(),
        }
    }

    fn reader(gateway: ProviderGateway, rpc: Arc<MockRpc>) -> ContractReader {
        ContractReader::new(Arc::new(gateway), rpc, ContractConfig::default())
    }

    #[tokio::test]
    async fn test_reads_through_fallback_without_wallet() {
        let chain = MockChain::new();
        chain.push_entry(raw(1, 10, "a"));
        chain.push_entry(raw(2, 20, "b"));
        chain.push_entry(raw(3, 30, "c"));
        chain.set_balance(1_000);
        let rpc = MockRpc::new(chain.clone());
        let reader = reader(ProviderGateway::without_wallet(), rpc.clone());

        let state = reader.read_state().await.unwrap();
        assert_eq!(state.total_count, 3);
        assert_eq!(state.entries[0], raw(1, 10, "a"));
        assert_eq!(state.entries[2], raw(3, 30, "c"));
        assert_eq!(state.balance, Amount::wei(1_000u64));
        assert_eq!(rpc.call_count(), 3);
    }

    #[tokio::test]
    async fn test_reads_through_wallet_on_expected_chain() {
        let chain = MockChain::new();
        chain.push_entry(raw(1, 10, "a"));
        let rpc = MockRpc::new(chain.clone());
        let wallet = MockWallet::new(chain.clone());
        let gateway = ProviderGateway::new(Some(wallet.clone()));
        gateway.current_chain().await.unwrap();
        let reader = reader(gateway, rpc.clone());

        assert_eq!(reader.read_total_count().await.unwrap(), 1);
        assert_eq!(rpc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_when_wallet_on_other_chain() {
        let chain = MockChain::new();
        let rpc = MockRpc::new(chain.clone());
        let wallet = MockWallet::new(chain.clone());
        wallet.set_chain(ChainId::MAINNET);
        let gateway = ProviderGateway::new(Some(wallet.clone()));
        gateway.current_chain().await.unwrap();
        let reader = reader(gateway, rpc.clone());

        assert_eq!(reader.read_total_count().await.unwrap(), 0);
        assert_eq!(rpc.call_count(), 1);
    }

    #[tokio::test]
    async fn test_network_unavailable() {
        let chain = MockChain::new();
        let rpc = MockRpc::new(chain);
        rpc.set_unreachable(true);
        let reader = reader(ProviderGateway::without_wallet(), rpc);

        assert!(matches!(
            reader.read_state().await,
            Err(ReadError::NetworkUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_reverted_read() {
        let chain = MockChain::new();
        chain.set_reads_revert(true);
        let rpc = MockRpc::new(chain);
        let reader = reader(ProviderGateway::without_wallet(), rpc);

        assert!(matches!(
            reader.read_all_entries().await,
            Err(ReadError::ContractCallFailed(_))
        ));
    }
}
