//! Log subscriptions over the wallet connection.

use super::{ProviderError, SubscriptionMessage, WalletTransport};
use crate::codec::to_hex;
use primitive_types::H256;
use punch_domain::AccountId;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the per-subscription log channel.
const LOG_CHANNEL_CAPACITY: usize = 256;

/// Filter for `eth_subscribe("logs", ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contract.
    pub address: AccountId,
    /// Topic filter, position by position.
    pub topics: Vec<H256>,
}

impl LogFilter {
    /// Renders the filter as an `eth_subscribe` parameter object.
    pub fn to_json(&self) -> Value {
        let topics: Vec<String> = self.topics.iter().map(|t| to_hex(t.as_bytes())).collect();
        json!({
            "address": self.address.to_string(),
            "topics": topics,
        })
    }
}

/// An active `eth_subscribe` subscription.
///
/// Raw log objects are forwarded unmodified; decoding is the consumer's
/// job. Dropping the handle stops forwarding but cannot reach the provider,
/// so call [`LogSubscription::unsubscribe`] for a clean teardown.
pub struct LogSubscription {
    /// Provider-assigned subscription id.
    id: String,
    /// Receiver of raw log objects.
    receiver: Option<mpsc::Receiver<Value>>,
    /// Task routing provider messages into the channel.
    forwarder: JoinHandle<()>,
    /// Provider used to cancel the subscription.
    wallet: Arc<dyn WalletTransport>,
}

impl LogSubscription {
    /// Subscribes and starts forwarding matching provider messages.
    pub(crate) async fn open(
        wallet: Arc<dyn WalletTransport>,
        filter: LogFilter,
    ) -> Result<Self, ProviderError> {
        // Listen before subscribing so no message can slip through.
        let messages = wallet.messages();

        let result = wallet
            .call("eth_subscribe", json!(["logs", filter.to_json()]))
            .await?;
        let id = result
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("eth_subscribe id is not a string".into()))?
            .to_string();

        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(forward_messages(messages, id.clone(), tx));

        info!(subscription = %id, address = %filter.address, "Opened log subscription");

        Ok(Self {
            id,
            receiver: Some(rx),
            forwarder,
            wallet,
        })
    }

    /// Returns the provider-assigned id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Takes the log receiver.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<Value>> {
        self.receiver.take()
    }

    /// Stops forwarding and cancels the subscription at the provider.
    pub async fn unsubscribe(self) -> Result<(), ProviderError> {
        self.forwarder.abort();
        self.wallet
            .call("eth_unsubscribe", json!([self.id]))
            .await?;
        info!(subscription = %self.id, "Closed log subscription");
        Ok(())
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn forward_messages(
    mut messages: broadcast::Receiver<SubscriptionMessage>,
    id: String,
    tx: mpsc::Sender<Value>,
) {
    loop {
        match messages.recv().await {
            Ok(SubscriptionMessage {
                subscription,
                result,
            }) if subscription == id => {
                if tx.send(result).await.is_err() {
                    debug!(subscription = %id, "Log receiver dropped");
                    break;
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(subscription = %id, skipped = skipped, "Log subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
