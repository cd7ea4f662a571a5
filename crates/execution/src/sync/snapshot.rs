//! Immutable view of the synchronized board.

use chrono::{DateTime, Utc};
use primitive_types::H256;
use punch_domain::{AccountId, AggregateCounters, Amount, ChainId, ConnectionState, Entry};
use punch_protocols::punch::ContractState;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Block explorer used for author links.
pub const EXPLORER_BASE_URL: &str = "https://rinkeby.etherscan.io";

/// Returns the explorer page of an address.
pub fn explorer_address_url(account: &AccountId) -> String {
    format!("{EXPLORER_BASE_URL}/address/{account}")
}

/// Progress of the initial load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Nothing has been read yet.
    #[default]
    Empty,
    /// The first seed is in flight, or every seed so far failed.
    Seeding,
    /// At least one seed has been applied.
    Ready,
}

/// What the connect control should offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectAction {
    /// No wallet extension is injected.
    InstallWallet,
    /// A wallet is present but no account is connected.
    Connect,
    /// Connected as this account.
    Connected(AccountId),
}

/// A submitted punch whose transaction has not terminated yet.
///
/// Shown beside the entry list, never inside it, and never counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPunch {
    /// Local identifier.
    pub id: Uuid,
    /// Submitting account.
    pub author: AccountId,
    /// Submitted message.
    pub payload: String,
    /// Transaction hash once broadcast.
    pub tx_hash: Option<H256>,
    /// When the submission started.
    pub submitted_at: DateTime<Utc>,
}

impl PendingPunch {
    /// Creates a pending punch for a submission that has just started.
    pub fn new(author: AccountId, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            payload: payload.into(),
            tx_hash: None,
            submitted_at: Utc::now(),
        }
    }
}

/// One authoritative read of the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedBatch {
    /// Entries in chain order, oldest first.
    pub entries: Vec<Entry>,
    /// `getTotalPunches()` at read time.
    pub total_count: u64,
    /// Contract balance at read time.
    pub balance: Amount,
}

impl SeedBatch {
    /// Creates a batch from entries in chain order.
    pub fn new(entries: Vec<Entry>, total_count: u64, balance: Amount) -> Self {
        Self {
            entries,
            total_count,
            balance,
        }
    }
}

impl From<ContractState> for SeedBatch {
    fn from(state: ContractState) -> Self {
        let entries = state
            .entries
            .into_iter()
            .map(|raw| Entry::seed(raw.author, raw.occurred_at, raw.payload))
            .collect();
        Self::new(entries, state.total_count, state.balance)
    }
}

/// Everything the view needs, published as one immutable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    /// Increases by one with every published change.
    pub version: u64,
    /// Load progress.
    pub phase: SyncPhase,
    /// Deduplicated entries, newest first.
    pub entries: Vec<Entry>,
    /// Count and balance.
    pub counters: AggregateCounters,
    /// Wallet connection.
    pub connection: ConnectionState,
    /// Chain the wallet is on, when known.
    pub chain: Option<ChainId>,
    /// Chain the contract is deployed on.
    pub expected_chain: ChainId,
    /// Whether a wallet extension is injected.
    pub wallet_available: bool,
    /// Submissions in flight.
    pub pending: Vec<PendingPunch>,
}

impl ViewSnapshot {
    /// Creates the initial snapshot.
    pub fn new(expected_chain: ChainId, wallet_available: bool) -> Self {
        Self {
            version: 0,
            phase: SyncPhase::Empty,
            entries: Vec::new(),
            counters: AggregateCounters::default(),
            connection: ConnectionState::Disconnected,
            chain: None,
            expected_chain,
            wallet_available,
            pending: Vec::new(),
        }
    }

    /// Whether the wallet is on the contract's chain.
    pub fn on_expected_chain(&self) -> bool {
        self.chain == Some(self.expected_chain)
    }

    /// Whether a punch can be submitted right now.
    pub fn can_write(&self) -> bool {
        self.connection.is_connected() && self.on_expected_chain()
    }

    /// State of the connect control.
    pub fn connect_action(&self) -> ConnectAction {
        match self.connection {
            ConnectionState::Connected(account) => ConnectAction::Connected(account),
            ConnectionState::Disconnected if self.wallet_available => ConnectAction::Connect,
            ConnectionState::Disconnected => ConnectAction::InstallWallet,
        }
    }

    /// Contract balance in ether.
    pub fn balance_ether(&self) -> Option<Decimal> {
        self.counters.balance.to_decimal()
    }
}
