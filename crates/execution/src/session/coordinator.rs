//! Session coordinator driving the reconciler from wallet and contract
//! inputs.

use super::{Notification, SessionConfig};
use crate::error::SyncError;
use crate::sync::{EventSubscriber, PendingPunch, Reconciler, ViewSnapshot};
use punch_domain::{AccountId, ConnectionState, validate_payload};
use punch_protocols::punch::{ContractReader, ContractWriter};
use punch_protocols::rpc::{RpcProvider, RpcTransport};
use punch_protocols::wallet::{ProviderChange, ProviderGateway, TransactionReceipt, WalletTransport};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Removes a pending punch from the overlay when the submission ends,
/// including when the submitting future is dropped.
struct PendingGuard {
    reconciler: Arc<Reconciler>,
    id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.reconciler.resolve_pending(self.id);
    }
}

/// One page session: owns every component and the change watcher.
pub struct PunchSession {
    /// Configuration.
    config: SessionConfig,
    /// Sole owner of the wallet connection.
    gateway: Arc<ProviderGateway>,
    /// Contract reads.
    reader: ContractReader,
    /// Contract writes.
    writer: ContractWriter,
    /// Snapshot owner.
    reconciler: Arc<Reconciler>,
    /// Live event subscription.
    subscriber: EventSubscriber,
    /// One-shot notices.
    notifications: broadcast::Sender<Notification>,
    /// Task applying wallet changes.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl PunchSession {
    /// Creates a session reading through the configured HTTP endpoint.
    pub fn new(config: SessionConfig, wallet: Option<Arc<dyn WalletTransport>>) -> Arc<Self> {
        let fallback: Arc<dyn RpcTransport> = Arc::new(RpcProvider::new(config.rpc.clone()));
        Self::with_fallback(config, wallet, fallback)
    }

    /// Creates a session with an explicit read-only transport.
    pub fn with_fallback(
        config: SessionConfig,
        wallet: Option<Arc<dyn WalletTransport>>,
        fallback: Arc<dyn RpcTransport>,
    ) -> Arc<Self> {
        let gateway = Arc::new(ProviderGateway::new(wallet));
        let reconciler = Arc::new(Reconciler::new(
            config.contract.expected_chain,
            gateway.is_available(),
        ));
        let reader = ContractReader::new(gateway.clone(), fallback, config.contract);
        let writer = ContractWriter::new(gateway.clone(), config.contract, config.writer.clone());
        let subscriber =
            EventSubscriber::new(gateway.clone(), reconciler.clone(), config.contract.address);
        let (notifications, _) = broadcast::channel(config.notification_capacity);

        Arc::new(Self {
            config,
            gateway,
            reader,
            writer,
            reconciler,
            subscriber,
            notifications,
            watcher: Mutex::new(None),
        })
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        self.reconciler.snapshot()
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewSnapshot>> {
        self.reconciler.subscribe()
    }

    /// Receiver of one-shot notices.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Restores wallet state without prompting, starts watching wallet
    /// changes, and seeds the board.
    ///
    /// Only the seed's failure is returned; wallet problems are logged and
    /// leave the session disconnected.
    pub async fn load(self: &Arc<Self>) -> Result<(), SyncError> {
        if self.gateway.is_available() {
            if let Err(e) = self.start_watching().await {
                warn!(error = %e, "Could not watch wallet changes");
            }
            self.sync_chain().await;
            match self.gateway.current_account().await {
                Ok(Some(account)) => {
                    info!(account = %account, "Found authorized account");
                    self.reconciler
                        .set_connection(ConnectionState::Connected(account));
                    self.resubscribe(account).await;
                }
                Ok(None) => info!("No authorized account found"),
                Err(e) => warn!(error = %e, "Could not query authorized account"),
            }
        } else {
            info!("No wallet provider, reading through fallback endpoint");
        }
        self.refresh().await
    }

    /// Re-reads count, entries and balance and applies them as one seed.
    ///
    /// On failure the last good snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let ticket = self.reconciler.begin_seed();
        match self.reader.read_state().await {
            Ok(state) => {
                self.reconciler.seed(ticket, state.into());
                Ok(())
            }
            Err(e) => {
                self.reconciler.seed_failed(ticket, &e);
                Err(e.into())
            }
        }
    }

    /// Prompts the user to connect. Call only from a user action.
    pub async fn connect(&self) -> Result<AccountId, SyncError> {
        match self.gateway.request_connection().await {
            Ok(account) => {
                self.reconciler
                    .set_connection(ConnectionState::Connected(account));
                self.sync_chain().await;
                self.resubscribe(account).await;
                self.notify(Notification::info(format!("Connected as {account}")));
                Ok(account)
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    /// Submits a punch and waits for it to be mined.
    ///
    /// While the transaction is in flight the punch is shown in the pending
    /// overlay. Once mined the board is re-seeded, so the entry appears
    /// exactly once whether or not its live event arrives.
    pub async fn submit(&self, payload: &str) -> Result<TransactionReceipt, SyncError> {
        let snapshot = self.snapshot();
        let guard = match snapshot.connection.account() {
            Some(author) if snapshot.can_write() && validate_payload(payload).is_ok() => {
                Some(PendingGuard {
                    reconciler: self.reconciler.clone(),
                    id: self
                        .reconciler
                        .add_pending(PendingPunch::new(author, payload)),
                })
            }
            _ => None,
        };

        let pending = self
            .writer
            .send(payload)
            .await
            .map_err(|e| self.report(e.into()))?;
        if let Some(guard) = &guard {
            self.reconciler.set_pending_tx(guard.id, pending.tx_hash());
        }
        self.notify(Notification::info("Punch submitted, waiting for confirmation"));

        let receipt = pending.wait().await.map_err(|e| self.report(e.into()))?;
        drop(guard);
        info!(
            tx_hash = ?receipt.tx_hash,
            block = receipt.block_number,
            "Punch confirmed"
        );

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Re-seed after confirmation failed");
        }
        self.notify(Notification::info("Punch confirmed"));
        Ok(receipt)
    }

    /// Applies one wallet change.
    pub async fn handle_change(&self, change: ProviderChange) {
        debug!(change = ?change, "Wallet change");
        match change {
            ProviderChange::AccountChanged(account) => {
                self.reconciler
                    .set_connection(ConnectionState::from_account(account));
                match account {
                    Some(account) => self.resubscribe(account).await,
                    None => self.subscriber.detach().await,
                }
            }
            ProviderChange::ChainChanged(chain) => {
                self.reconciler.set_chain(Some(chain));
                if let Some(account) = self.snapshot().connection.account() {
                    self.resubscribe(account).await;
                }
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Re-seed after chain change failed");
                }
            }
            ProviderChange::Disconnected => {
                self.reconciler.set_chain(None);
                self.reconciler.set_connection(ConnectionState::Disconnected);
                self.subscriber.detach().await;
            }
        }
    }

    /// Stops watching wallet changes and releases the live subscription.
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
        self.subscriber.detach().await;
        info!("Session shut down");
    }

    async fn start_watching(self: &Arc<Self>) -> Result<(), SyncError> {
        let mut changes = self.gateway.changes()?;
        // The watcher must not keep the session alive.
        let session: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_change(change).await;
            }
            debug!("Wallet change stream ended");
        });

        if let Some(previous) = self.watcher.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn sync_chain(&self) {
        match self.gateway.current_chain().await {
            Ok(chain) => {
                self.reconciler.set_chain(Some(chain));
            }
            Err(e) => warn!(error = %e, "Unable to determine the chain id"),
        }
    }

    async fn resubscribe(&self, account: AccountId) {
        if let Err(e) = self.subscriber.attach(account).await {
            error!(account = %account, error = %e, "Failed to subscribe to NewPunch");
        }
    }

    fn report(&self, error: SyncError) -> SyncError {
        match Notification::from_error(&error) {
            Some(notice) => {
                warn!(error = %error, "Operation failed");
                self.notify(notice);
            }
            None => debug!(error = %error, "Operation declined"),
        }
        error
    }

    fn notify(&self, notice: Notification) {
        if self.notifications.send(notice).is_err() {
            debug!("No notification listeners");
        }
    }
}
