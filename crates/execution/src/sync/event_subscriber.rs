//! `NewPunch` log subscription feeding the reconciler.

use super::Reconciler;
use crate::error::SyncError;
use primitive_types::H256;
use punch_domain::{AccountId, Entry};
use punch_protocols::codec::{parse_h256, parse_hex_bytes};
use punch_protocols::punch::abi::{AbiError, NEW_PUNCH_TOPIC, decode_new_punch};
use punch_protocols::wallet::{LogFilter, LogSubscription, ProviderError, ProviderGateway};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reasons a raw emission is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmissionError {
    /// Emitted by another contract.
    #[error("log from unexpected contract {0}")]
    WrongContract(String),
    /// Not a `NewPunch` log.
    #[error("log is not a NewPunch event")]
    WrongTopic,
    /// Retracted by a chain reorganization.
    #[error("log was removed by a reorg")]
    Removed,
    /// The log object or its data could not be decoded.
    #[error("malformed log: {0}")]
    Malformed(String),
}

impl From<AbiError> for EmissionError {
    fn from(error: AbiError) -> Self {
        match error {
            AbiError::WrongTopic => Self::WrongTopic,
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// Normalizes a raw `eth_subscription` log into a live entry.
pub fn normalize_log(log: &Value, contract: AccountId) -> Result<Entry, EmissionError> {
    if log.get("removed").and_then(Value::as_bool) == Some(true) {
        return Err(EmissionError::Removed);
    }

    let address = log
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| EmissionError::Malformed("missing address".into()))?;
    let emitter: AccountId = address
        .parse()
        .map_err(|e: punch_domain::DomainError| EmissionError::Malformed(e.to_string()))?;
    if emitter != contract {
        return Err(EmissionError::WrongContract(emitter.to_string()));
    }

    let topics = log
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| EmissionError::Malformed("missing topics".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| "topic is not a string".to_string())
                .and_then(|raw| parse_h256(raw, "topic"))
        })
        .collect::<Result<Vec<H256>, String>>()
        .map_err(EmissionError::Malformed)?;

    let data = log
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| EmissionError::Malformed("missing data".into()))?;
    let data = parse_hex_bytes(data, "data").map_err(EmissionError::Malformed)?;

    let raw = decode_new_punch(&topics, &data)?;
    Ok(Entry::live(raw.author, raw.occurred_at, raw.payload))
}

/// The subscription currently feeding the reconciler.
struct ActiveSubscription {
    /// Account the subscription was opened for.
    account: AccountId,
    /// Provider-side subscription.
    subscription: LogSubscription,
    /// Task normalizing logs into live entries.
    normalizer: JoinHandle<()>,
}

#[derive(Default)]
struct SubscriberState {
    active: Option<ActiveSubscription>,
    /// Ids whose `eth_unsubscribe` failed; retried on the next attach or detach.
    orphaned: Vec<String>,
}

/// Keeps at most one `NewPunch` subscription open.
pub struct EventSubscriber {
    /// Gateway owning the wallet connection.
    gateway: Arc<ProviderGateway>,
    /// Destination of normalized entries.
    reconciler: Arc<Reconciler>,
    /// Contract whose logs are accepted.
    contract: AccountId,
    /// Active subscription and any provider-side leftovers.
    state: Mutex<SubscriberState>,
}

impl EventSubscriber {
    /// Creates a subscriber with no active subscription.
    pub fn new(
        gateway: Arc<ProviderGateway>,
        reconciler: Arc<Reconciler>,
        contract: AccountId,
    ) -> Self {
        Self {
            gateway,
            reconciler,
            contract,
            state: Mutex::new(SubscriberState::default()),
        }
    }

    /// Opens a subscription for `account`, tearing down any previous one
    /// first.
    pub async fn attach(&self, account: AccountId) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.active.take() {
            state.orphaned.extend(teardown(previous).await);
        }

        let filter = LogFilter {
            address: self.contract,
            topics: vec![H256::from(NEW_PUNCH_TOPIC)],
        };
        let mut subscription = self.gateway.subscribe_logs(filter).await?;
        let receiver = subscription.take_receiver().ok_or_else(|| {
            ProviderError::InvalidResponse("subscription receiver already taken".into())
        })?;
        let normalizer = tokio::spawn(normalize_logs(
            receiver,
            self.reconciler.clone(),
            self.contract,
        ));

        info!(
            account = %account,
            subscription = %subscription.id(),
            "Subscribed to NewPunch"
        );

        state.active = Some(ActiveSubscription {
            account,
            subscription,
            normalizer,
        });
        self.release_orphans(&mut state.orphaned).await;
        Ok(())
    }

    /// Releases the active subscription, if any.
    pub async fn detach(&self) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.active.take() {
            state.orphaned.extend(teardown(previous).await);
        }
        self.release_orphans(&mut state.orphaned).await;
    }

    /// Whether a subscription is active.
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Account the active subscription was opened for.
    pub async fn account(&self) -> Option<AccountId> {
        self.state.lock().await.active.as_ref().map(|a| a.account)
    }

    /// Provider-side subscriptions that could not be cancelled yet.
    pub async fn orphaned_subscriptions(&self) -> Vec<String> {
        self.state.lock().await.orphaned.clone()
    }

    async fn release_orphans(&self, orphaned: &mut Vec<String>) {
        let mut still_open = Vec::new();
        for id in orphaned.drain(..) {
            match self.gateway.unsubscribe(&id).await {
                Ok(()) => info!(subscription = %id, "Released orphaned subscription"),
                Err(e) => {
                    warn!(subscription = %id, error = %e, "Orphaned subscription still open");
                    still_open.push(id);
                }
            }
        }
        *orphaned = still_open;
    }
}

/// Cancels a subscription, returning its id when the provider kept it open.
async fn teardown(active: ActiveSubscription) -> Option<String> {
    active.normalizer.abort();
    let id = active.subscription.id().to_string();
    match active.subscription.unsubscribe().await {
        Ok(()) => {
            debug!(subscription = %id, account = %active.account, "Tore down NewPunch subscription");
            None
        }
        Err(e) => {
            warn!(subscription = %id, error = %e, "Failed to unsubscribe, will retry");
            Some(id)
        }
    }
}

async fn normalize_logs(
    mut receiver: mpsc::Receiver<Value>,
    reconciler: Arc<Reconciler>,
    contract: AccountId,
) {
    while let Some(log) = receiver.recv().await {
        match normalize_log(&log, contract) {
            Ok(entry) => {
                reconciler.observe_live(entry);
            }
            Err(e) => {
                let error = SyncError::from(e);
                warn!(error = %error, "Dropping NewPunch emission");
            }
        }
    }
    debug!("Log stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use punch_domain::{ChainId, Origin};
    use punch_protocols::punch::{DEFAULT_CONTRACT_ADDRESS, RawEntry};
    use punch_protocols::testing::{MockChain, MockWallet};
    use serde_json::json;
    use std::time::Duration;

    fn raw(byte: u8, ts: u64, payload: &str) -> RawEntry {
        RawEntry {
            author: AccountId::from_bytes([byte; 20]),
            occurred_at: ts,
            payload: payload.to_string(),
        }
    }

    fn log_for(entry: &RawEntry) -> Value {
        let (topics, data) = punch_protocols::punch::abi::encode_new_punch(entry);
        let topics: Vec<String> = topics
            .iter()
            .map(|t| punch_protocols::codec::to_hex(t.as_bytes()))
            .collect();
        json!({
            "address": DEFAULT_CONTRACT_ADDRESS.to_string(),
            "topics": topics,
            "data": punch_protocols::codec::to_hex(&data),
            "removed": false,
        })
    }

    async fn wait_for_entries(reconciler: &Reconciler, n: usize) {
        let mut rx = reconciler.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            while rx.borrow_and_update().entries.len() < n {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_normalize_log() {
        let entry = normalize_log(&log_for(&raw(1, 42, "hi")), DEFAULT_CONTRACT_ADDRESS).unwrap();
        assert_eq!(entry.author, AccountId::from_bytes([1; 20]));
        assert_eq!(entry.occurred_at, 42);
        assert_eq!(entry.payload, "hi");
        assert_eq!(entry.origin, Origin::Live);
    }

    #[test]
    fn test_normalize_rejects_bad_emissions() {
        let mut removed = log_for(&raw(1, 42, "hi"));
        removed["removed"] = json!(true);
        assert_eq!(
            normalize_log(&removed, DEFAULT_CONTRACT_ADDRESS),
            Err(EmissionError::Removed)
        );

        let other = AccountId::from_bytes([0xee; 20]);
        assert!(matches!(
            normalize_log(&log_for(&raw(1, 42, "hi")), other),
            Err(EmissionError::WrongContract(_))
        ));

        let mut wrong_topic = log_for(&raw(1, 42, "hi"));
        wrong_topic["topics"][0] = json!(format!("0x{}", "11".repeat(32)));
        assert_eq!(
            normalize_log(&wrong_topic, DEFAULT_CONTRACT_ADDRESS),
            Err(EmissionError::WrongTopic)
        );

        let mut truncated = log_for(&raw(1, 42, "hi"));
        truncated["data"] = json!("0x1234");
        assert!(matches!(
            normalize_log(&truncated, DEFAULT_CONTRACT_ADDRESS),
            Err(EmissionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_forwards_live_entries() {
        let chain = MockChain::new();
        let wallet = MockWallet::new(chain);
        let gateway = Arc::new(ProviderGateway::new(Some(wallet.clone())));
        let reconciler = Arc::new(Reconciler::new(ChainId::RINKEBY, true));
        let subscriber =
            EventSubscriber::new(gateway, reconciler.clone(), DEFAULT_CONTRACT_ADDRESS);

        let account = AccountId::from_bytes([5; 20]);
        subscriber.attach(account).await.unwrap();
        assert!(subscriber.is_active().await);
        assert_eq!(subscriber.account().await, Some(account));

        wallet.emit_log(&raw(1, 10, "a"));
        wallet.emit_log(&raw(1, 10, "a"));
        wallet.emit_removed_log(&raw(2, 20, "gone"));
        wallet.emit_log(&raw(3, 30, "c"));

        wait_for_entries(&reconciler, 2).await;
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[0].payload, "c");
        assert_eq!(snapshot.counters.total_count, 2);
    }

    #[tokio::test]
    async fn test_reattach_keeps_one_subscription() {
        let wallet = MockWallet::new(MockChain::new());
        let gateway = Arc::new(ProviderGateway::new(Some(wallet.clone())));
        let reconciler = Arc::new(Reconciler::new(ChainId::RINKEBY, true));
        let subscriber =
            EventSubscriber::new(gateway, reconciler.clone(), DEFAULT_CONTRACT_ADDRESS);

        subscriber.attach(AccountId::from_bytes([1; 20])).await.unwrap();
        subscriber.attach(AccountId::from_bytes([2; 20])).await.unwrap();
        assert_eq!(wallet.active_subscriptions(), 1);

        wallet.emit_log(&raw(1, 10, "once"));
        wait_for_entries(&reconciler, 1).await;
        assert_eq!(reconciler.snapshot().counters.total_count, 1);

        subscriber.detach().await;
        assert_eq!(wallet.active_subscriptions(), 0);
        assert!(!subscriber.is_active().await);
    }

    #[tokio::test]
    async fn test_failed_unsubscribe_is_retried() {
        let wallet = MockWallet::new(MockChain::new());
        let gateway = Arc::new(ProviderGateway::new(Some(wallet.clone())));
        let reconciler = Arc::new(Reconciler::new(ChainId::RINKEBY, true));
        let subscriber =
            EventSubscriber::new(gateway, reconciler.clone(), DEFAULT_CONTRACT_ADDRESS);

        subscriber.attach(AccountId::from_bytes([1; 20])).await.unwrap();
        wallet.set_unsubscribe_fails(true);
        subscriber.attach(AccountId::from_bytes([2; 20])).await.unwrap();
        assert_eq!(wallet.active_subscriptions(), 2);
        assert_eq!(subscriber.orphaned_subscriptions().await.len(), 1);

        wallet.set_unsubscribe_fails(false);
        subscriber.attach(AccountId::from_bytes([3; 20])).await.unwrap();
        assert_eq!(wallet.active_subscriptions(), 1);
        assert!(subscriber.orphaned_subscriptions().await.is_empty());

        wallet.set_unsubscribe_fails(true);
        subscriber.detach().await;
        assert_eq!(subscriber.orphaned_subscriptions().await.len(), 1);
        wallet.set_unsubscribe_fails(false);
        subscriber.detach().await;
        assert_eq!(wallet.active_subscriptions(), 0);
        assert!(subscriber.orphaned_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_without_wallet_fails() {
        let gateway = Arc::new(ProviderGateway::without_wallet());
        let reconciler = Arc::new(Reconciler::new(ChainId::RINKEBY, false));
        let subscriber = EventSubscriber::new(gateway, reconciler, DEFAULT_CONTRACT_ADDRESS);

        assert_eq!(
            subscriber.attach(AccountId::from_bytes([1; 20])).await,
            Err(ProviderError::NoProviderAvailable)
        );
        assert!(!subscriber.is_active().await);
    }
}
