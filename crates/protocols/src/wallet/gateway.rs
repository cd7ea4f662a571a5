//! Gateway owning the injected wallet connection.

use super::{
    LogFilter, LogSubscription, TransactionReceipt, TransactionRequest, WalletEvent,
    WalletTransport, is_user_rejection,
};
use crate::codec::{parse_h256, to_hex};
use crate::rpc::RpcError;
use primitive_types::H256;
use punch_domain::{AccountId, ChainId};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors raised by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// No wallet extension is injected.
    #[error("no wallet provider available")]
    NoProviderAvailable,
    /// The user dismissed or declined the wallet prompt.
    #[error("user rejected the request")]
    UserRejected,
    /// The provider returned an error.
    #[error(transparent)]
    Rpc(RpcError),
    /// The provider answered with something unexpected.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<RpcError> for ProviderError {
    fn from(error: RpcError) -> Self {
        match error.code() {
            Some(code) if is_user_rejection(code) => Self::UserRejected,
            _ => Self::Rpc(error),
        }
    }
}

/// Normalized wallet-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChange {
    /// Active account changed; `None` when every account was revoked.
    AccountChanged(Option<AccountId>),
    /// The wallet switched chains.
    ChainChanged(ChainId),
    /// The provider lost its connection to every chain.
    Disconnected,
}

/// Stream of normalized wallet-state changes.
///
/// If the receiver falls behind and notifications are lost, the stream
/// re-reads the account and chain from the wallet and yields them as
/// changes.
pub struct GatewayEvents {
    /// Raw provider notifications.
    rx: broadcast::Receiver<WalletEvent>,
    /// Wallet queried when notifications were missed.
    wallet: Arc<dyn WalletTransport>,
    /// Chain cache shared with the gateway.
    chain: Arc<RwLock<Option<ChainId>>>,
    /// Changes recovered by a resync, delivered before newer events.
    resynced: VecDeque<ProviderChange>,
}

impl GatewayEvents {
    /// Waits for the next account or chain change.
    ///
    /// Returns `None` once the provider has gone away. Unparseable
    /// notifications are skipped.
    pub async fn recv(&mut self) -> Option<ProviderChange> {
        loop {
            if let Some(change) = self.resynced.pop_front() {
                return Some(change);
            }
            match self.rx.recv().await {
                Ok(WalletEvent::AccountsChanged(accounts)) => match first_account(&accounts) {
                    Ok(account) => return Some(ProviderChange::AccountChanged(account)),
                    Err(e) => warn!(error = %e, "Ignoring malformed accountsChanged"),
                },
                Ok(WalletEvent::ChainChanged(raw)) => match raw.parse::<ChainId>() {
                    Ok(chain) => {
                        *self.chain.write().await = Some(chain);
                        return Some(ProviderChange::ChainChanged(chain));
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed chainChanged"),
                },
                Ok(WalletEvent::Disconnect) => {
                    *self.chain.write().await = None;
                    return Some(ProviderChange::Disconnected);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Wallet event stream lagged, resyncing");
                    self.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Queues the wallet's current account and chain after missed events.
    async fn resync(&mut self) {
        match query_account(self.wallet.as_ref()).await {
            Ok(account) => self
                .resynced
                .push_back(ProviderChange::AccountChanged(account)),
            Err(e) => warn!(error = %e, "Unable to resync account"),
        }
        match query_chain(self.wallet.as_ref()).await {
            Ok(chain) => {
                *self.chain.write().await = Some(chain);
                self.resynced.push_back(ProviderChange::ChainChanged(chain));
            }
            Err(e) => warn!(error = %e, "Unable to resync chain"),
        }
    }
}

/// Background listener registered through a callback.
///
/// Dropping the handle stops the listener.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops the listener.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Sole owner of the injected wallet connection.
///
/// Every wallet request in the process goes through this type; nothing
/// else holds a `WalletTransport`.
pub struct ProviderGateway {
    /// Injected provider, absent when no extension is installed.
    wallet: Option<Arc<dyn WalletTransport>>,
    /// Last chain reported by the wallet.
    chain: Arc<RwLock<Option<ChainId>>>,
}

impl ProviderGateway {
    /// Creates a gateway over an optional injected provider.
    pub fn new(wallet: Option<Arc<dyn WalletTransport>>) -> Self {
        Self {
            wallet,
            chain: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates a gateway for a page without a wallet extension.
    pub fn without_wallet() -> Self {
        Self::new(None)
    }

    /// Whether a wallet extension is injected.
    pub fn is_available(&self) -> bool {
        self.wallet.is_some()
    }

    /// Returns the injected provider or fails fast.
    pub fn wallet(&self) -> Result<&Arc<dyn WalletTransport>, ProviderError> {
        self.wallet.as_ref().ok_or(ProviderError::NoProviderAvailable)
    }

    /// Returns the already-authorized account without prompting (`eth_accounts`).
    pub async fn current_account(&self) -> Result<Option<AccountId>, ProviderError> {
        let account = query_account(self.wallet()?.as_ref()).await?;
        debug!(account = ?account.map(|a| a.to_string()), "Queried authorized account");
        Ok(account)
    }

    /// Prompts the user to connect (`eth_requestAccounts`).
    ///
    /// Opens exactly one wallet prompt. The future may stay pending for as
    /// long as the prompt is open; drop it to stop waiting.
    pub async fn request_connection(&self) -> Result<AccountId, ProviderError> {
        let wallet = self.wallet()?;
        info!("Requesting wallet connection");
        let result = wallet.call("eth_requestAccounts", json!([])).await?;
        let account = accounts_from_value(&result)?.ok_or_else(|| {
            ProviderError::InvalidResponse("eth_requestAccounts returned no account".to_string())
        })?;
        info!(account = %account, "Wallet connected");
        Ok(account)
    }

    /// Queries the wallet's active chain (`eth_chainId`).
    pub async fn current_chain(&self) -> Result<ChainId, ProviderError> {
        let chain = query_chain(self.wallet()?.as_ref()).await?;
        *self.chain.write().await = Some(chain);
        Ok(chain)
    }

    /// Returns the last chain observed through a query or a change event.
    pub async fn cached_chain(&self) -> Option<ChainId> {
        *self.chain.read().await
    }

    /// Opens a stream of account and chain changes.
    pub fn changes(&self) -> Result<GatewayEvents, ProviderError> {
        let wallet = self.wallet()?;
        Ok(GatewayEvents {
            rx: wallet.events(),
            wallet: wallet.clone(),
            chain: self.chain.clone(),
            resynced: VecDeque::new(),
        })
    }

    /// Invokes `callback` on every account change until the handle is dropped.
    pub fn on_account_changed<F>(&self, callback: F) -> Result<ListenerHandle, ProviderError>
    where
        F: Fn(Option<AccountId>) + Send + 'static,
    {
        let mut events = self.changes()?;
        let task = tokio::spawn(async move {
            while let Some(change) = events.recv().await {
                match change {
                    ProviderChange::AccountChanged(account) => callback(account),
                    ProviderChange::Disconnected => callback(None),
                    ProviderChange::ChainChanged(_) => {}
                }
            }
        });
        Ok(ListenerHandle { task })
    }

    /// Invokes `callback` on every chain change until the handle is dropped.
    pub fn on_chain_changed<F>(&self, callback: F) -> Result<ListenerHandle, ProviderError>
    where
        F: Fn(ChainId) + Send + 'static,
    {
        let mut events = self.changes()?;
        let task = tokio::spawn(async move {
            while let Some(change) = events.recv().await {
                if let ProviderChange::ChainChanged(chain) = change {
                    callback(chain);
                }
            }
        });
        Ok(ListenerHandle { task })
    }

    /// Asks the wallet to sign and broadcast a transaction.
    ///
    /// Suspends until the user approves or dismisses the signature prompt.
    pub async fn send_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<H256, ProviderError> {
        let wallet = self.wallet()?;
        info!(from = %request.from, to = %request.to, "Requesting transaction signature");
        let result = wallet
            .call("eth_sendTransaction", json!([request.to_json()]))
            .await?;
        let raw = result.as_str().ok_or_else(|| {
            ProviderError::InvalidResponse("eth_sendTransaction did not return a hash".into())
        })?;
        let hash = parse_h256(raw, "transaction hash").map_err(ProviderError::InvalidResponse)?;
        info!(tx_hash = ?hash, "Transaction broadcast");
        Ok(hash)
    }

    /// Fetches the receipt of a transaction, `None` while it is pending.
    pub async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        let wallet = self.wallet()?;
        let result = wallet
            .call(
                "eth_getTransactionReceipt",
                json!([to_hex(tx_hash.as_bytes())]),
            )
            .await?;
        TransactionReceipt::from_rpc(result).map_err(ProviderError::InvalidResponse)
    }

    /// Opens a log subscription through the wallet connection.
    pub async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ProviderError> {
        let wallet = self.wallet()?.clone();
        LogSubscription::open(wallet, filter).await
    }

    /// Releases a subscription by id (`eth_unsubscribe`).
    pub async fn unsubscribe(&self, id: &str) -> Result<(), ProviderError> {
        let wallet = self.wallet()?;
        wallet.call("eth_unsubscribe", json!([id])).await?;
        debug!(subscription = %id, "Released log subscription");
        Ok(())
    }
}

/// `eth_accounts`: the authorized account, without prompting.
async fn query_account(wallet: &dyn WalletTransport) -> Result<Option<AccountId>, ProviderError> {
    let result = wallet.call("eth_accounts", json!([])).await?;
    accounts_from_value(&result)
}

/// `eth_chainId`.
async fn query_chain(wallet: &dyn WalletTransport) -> Result<ChainId, ProviderError> {
    let result = wallet.call("eth_chainId", json!([])).await?;
    let raw = result
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("eth_chainId is not a string".into()))?;
    raw.parse::<ChainId>()
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Parses the first entry of an `eth_accounts` style result.
fn accounts_from_value(value: &Value) -> Result<Option<AccountId>, ProviderError> {
    let list = value
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse("accounts result is not a list".into()))?;
    let accounts: Vec<String> = list
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    first_account(&accounts).map_err(ProviderError::InvalidResponse)
}

fn first_account(accounts: &[String]) -> Result<Option<AccountId>, String> {
    accounts
        .first()
        .map(|raw| raw.parse::<AccountId>().map_err(|e| e.to_string()))
        .transpose()
}
