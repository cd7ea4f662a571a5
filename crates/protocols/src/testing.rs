//! In-memory doubles for the node, the fallback endpoint and the wallet.
//!
//! `MockChain` holds contract state and the mempool. `MockRpc` and
//! `MockWallet` both answer reads from the same chain, the way a real
//! wallet and a public endpoint observe the same network.

use crate::codec::{parse_h256, parse_hex_bytes, to_hex, to_hex_quantity};
use crate::punch::DEFAULT_CONTRACT_ADDRESS;
use crate::punch::abi::{
    GET_ALL_PUNCHES_SELECTOR, GET_TOTAL_PUNCHES_SELECTOR, RawEntry, decode_punch_call,
    encode_all_punches, encode_new_punch, u64_word,
};
use crate::rpc::{RpcError, RpcTransport};
use crate::wallet::{SubscriptionMessage, USER_REJECTED_CODE, WalletEvent, WalletTransport};
use async_trait::async_trait;
use primitive_types::H256;
use punch_domain::{AccountId, ChainId};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Block timestamp of the first mined block.
const GENESIS_TIME: u64 = 1_640_000_000;
/// Seconds between mined blocks.
const BLOCK_TIME: u64 = 15;

struct PendingTx {
    hash: H256,
    from: AccountId,
    data: Vec<u8>,
}

struct ChainState {
    chain_id: ChainId,
    contract: AccountId,
    entries: Vec<RawEntry>,
    balance: u128,
    clock: u64,
    block: u64,
    nonce: u64,
    pending: Vec<PendingTx>,
    receipts: HashMap<H256, Value>,
    reads_revert: bool,
}

/// In-memory network with a single punch board contract.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    /// Creates an empty Rinkeby-like chain with the default deployment.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                chain_id: ChainId::RINKEBY,
                contract: DEFAULT_CONTRACT_ADDRESS,
                entries: Vec::new(),
                balance: 0,
                clock: GENESIS_TIME,
                block: 1,
                nonce: 0,
                pending: Vec::new(),
                receipts: HashMap::new(),
                reads_revert: false,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    /// Network chain id.
    pub fn chain_id(&self) -> ChainId {
        self.lock().chain_id
    }

    /// Appends an already-mined entry.
    pub fn push_entry(&self, entry: RawEntry) {
        self.lock().entries.push(entry);
    }

    /// Entries in contract order.
    pub fn entries(&self) -> Vec<RawEntry> {
        self.lock().entries.clone()
    }

    /// Sets the contract balance in wei.
    pub fn set_balance(&self, wei: u128) {
        self.lock().balance = wei;
    }

    /// Sets the timestamp of the next mined block.
    pub fn set_clock(&self, timestamp: u64) {
        self.lock().clock = timestamp;
    }

    /// Makes every contract read revert.
    pub fn set_reads_revert(&self, revert: bool) {
        self.lock().reads_revert = revert;
    }

    /// Call data of transactions waiting to be mined.
    pub fn pending_calldata(&self) -> Vec<Vec<u8>> {
        self.lock().pending.iter().map(|tx| tx.data.clone()).collect()
    }

    /// Accepts a signed transaction into the mempool.
    pub fn submit(&self, from: AccountId, data: Vec<u8>) -> H256 {
        let mut state = self.lock();
        state.nonce += 1;
        let hash = H256::from(u64_word(0xab00_0000 + state.nonce));
        state.pending.push(PendingTx { hash, from, data });
        hash
    }

    /// Mines every pending transaction into one block.
    ///
    /// Returns the entries the block appended.
    pub fn mine(&self) -> Vec<RawEntry> {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        let block = state.block;
        let timestamp = state.clock;
        let mut mined = Vec::new();
        for tx in pending {
            let status = match decode_punch_call(&tx.data) {
                Ok(payload) => {
                    let entry = RawEntry {
                        author: tx.from,
                        occurred_at: timestamp,
                        payload,
                    };
                    state.entries.push(entry.clone());
                    mined.push(entry);
                    "0x1"
                }
                Err(_) => "0x0",
            };
            state
                .receipts
                .insert(tx.hash, receipt_json(tx.hash, block, status));
        }
        state.block += 1;
        state.clock += BLOCK_TIME;
        mined
    }

    /// Mines every pending transaction as reverted.
    pub fn revert_pending(&self) {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        let block = state.block;
        for tx in pending {
            state.receipts.insert(tx.hash, receipt_json(tx.hash, block, "0x0"));
        }
        state.block += 1;
        state.clock += BLOCK_TIME;
    }

    /// Answers the read-only subset of JSON-RPC.
    pub fn handle(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let state = self.lock();
        match method {
            "eth_chainId" => Ok(json!(state.chain_id.to_string())),
            "eth_blockNumber" => Ok(json!(to_hex_quantity(state.block))),
            "eth_getBalance" => Ok(json!(format!("{:#x}", state.balance))),
            "eth_call" => {
                if state.reads_revert {
                    return Err(RpcError::Rpc {
                        code: 3,
                        message: "execution reverted".into(),
                    });
                }
                let data = params[0]["data"]
                    .as_str()
                    .ok_or_else(|| RpcError::InvalidResponse("missing call data".into()))
                    .and_then(|raw| parse_hex_bytes(raw, "data").map_err(RpcError::InvalidResponse))?;
                if data.len() < 4 {
                    return Ok(json!("0x"));
                }
                if data[..4] == GET_TOTAL_PUNCHES_SELECTOR {
                    Ok(json!(to_hex(&u64_word(state.entries.len() as u64))))
                } else if data[..4] == GET_ALL_PUNCHES_SELECTOR {
                    Ok(json!(to_hex(&encode_all_punches(&state.entries))))
                } else {
                    Err(RpcError::Rpc {
                        code: -32000,
                        message: "execution reverted: unknown selector".into(),
                    })
                }
            }
            "eth_getTransactionReceipt" => {
                let hash = params[0]
                    .as_str()
                    .ok_or_else(|| RpcError::InvalidResponse("missing hash".into()))
                    .and_then(|raw| parse_h256(raw, "hash").map_err(RpcError::InvalidResponse))?;
                Ok(state.receipts.get(&hash).cloned().unwrap_or(Value::Null))
            }
            other => Err(RpcError::Rpc {
                code: -32601,
                message: format!("method {other} not supported"),
            }),
        }
    }

    fn log_object(&self, entry: &RawEntry, removed: bool) -> Value {
        let state = self.lock();
        let (topics, data) = encode_new_punch(entry);
        let topics: Vec<String> = topics.iter().map(|t| to_hex(t.as_bytes())).collect();
        json!({
            "address": state.contract.to_string(),
            "topics": topics,
            "data": to_hex(&data),
            "blockNumber": to_hex_quantity(state.block),
            "removed": removed,
        })
    }
}

fn receipt_json(hash: H256, block: u64, status: &str) -> Value {
    json!({
        "transactionHash": to_hex(hash.as_bytes()),
        "blockNumber": to_hex_quantity(block),
        "status": status,
        "gasUsed": "0xb411",
    })
}

/// Read-only endpoint backed by a [`MockChain`].
pub struct MockRpc {
    chain: Arc<MockChain>,
    unreachable: AtomicBool,
    calls: AtomicUsize,
}

impl MockRpc {
    /// Creates an endpoint observing `chain`.
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            unreachable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    /// Makes every request fail as if the endpoint were offline.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for MockRpc {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RpcError::Unreachable("connection refused".into()));
        }
        self.chain.handle(method, &params)
    }
}

/// How the wallet answers `eth_requestAccounts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// The user picks this account.
    Approve(AccountId),
    /// The user dismisses the prompt.
    Reject,
    /// The prompt stays open forever.
    Pending,
}

/// How the wallet answers `eth_sendTransaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignBehavior {
    /// The user signs; the transaction enters the mempool.
    Approve,
    /// The user dismisses the prompt.
    Reject,
    /// The node refuses for lack of gas money.
    InsufficientFunds,
    /// The prompt stays open forever.
    Pending,
}

struct WalletState {
    authorized: Option<AccountId>,
    chain_id: ChainId,
    connect: ConnectBehavior,
    sign: SignBehavior,
    prompts: usize,
    signs: usize,
    subscriptions: Vec<String>,
    next_subscription: u64,
    unsubscribe_fails: bool,
}

enum Action {
    Reply(Result<Value, RpcError>),
    Hang,
}

/// Injected wallet double.
pub struct MockWallet {
    chain: Arc<MockChain>,
    state: Mutex<WalletState>,
    events: broadcast::Sender<WalletEvent>,
    messages: broadcast::Sender<SubscriptionMessage>,
}

impl MockWallet {
    /// Creates a wallet on `chain` with no authorized account.
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (messages, _) = broadcast::channel(256);
        let chain_id = chain.chain_id();
        Arc::new(Self {
            chain,
            state: Mutex::new(WalletState {
                authorized: None,
                chain_id,
                connect: ConnectBehavior::Reject,
                sign: SignBehavior::Approve,
                prompts: 0,
                signs: 0,
                subscriptions: Vec::new(),
                next_subscription: 1,
                unsubscribe_fails: false,
            }),
            events,
            messages,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WalletState> {
        self.state.lock().unwrap()
    }

    /// Marks `account` as already authorized for this page.
    pub fn authorize(&self, account: AccountId) {
        self.lock().authorized = Some(account);
    }

    /// Sets how the next connection prompts resolve.
    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.lock().connect = behavior;
    }

    /// Sets how the next signature prompts resolve.
    pub fn set_sign_behavior(&self, behavior: SignBehavior) {
        self.lock().sign = behavior;
    }

    /// Changes the active chain without notifying listeners.
    pub fn set_chain(&self, chain_id: ChainId) {
        self.lock().chain_id = chain_id;
    }

    /// Makes `eth_unsubscribe` fail while `fails` is set.
    pub fn set_unsubscribe_fails(&self, fails: bool) {
        self.lock().unsubscribe_fails = fails;
    }

    /// Number of connection prompts opened.
    pub fn prompt_count(&self) -> usize {
        self.lock().prompts
    }

    /// Number of signature prompts opened.
    pub fn sign_count(&self) -> usize {
        self.lock().signs
    }

    /// Number of open log subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Switches the active account and emits `accountsChanged`.
    pub fn switch_account(&self, account: Option<AccountId>) {
        self.lock().authorized = account;
        let accounts = account.map(|a| vec![a.to_string()]).unwrap_or_default();
        let _ = self.events.send(WalletEvent::AccountsChanged(accounts));
    }

    /// Switches the active chain and emits `chainChanged`.
    pub fn switch_chain(&self, chain_id: ChainId) {
        self.lock().chain_id = chain_id;
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id.to_string()));
    }

    /// Emits `disconnect`.
    pub fn disconnect(&self) {
        let _ = self.events.send(WalletEvent::Disconnect);
    }

    /// Emits a raw subscription message.
    pub fn emit_message(&self, subscription: &str, result: Value) {
        let _ = self.messages.send(SubscriptionMessage {
            subscription: subscription.to_string(),
            result,
        });
    }

    /// Delivers a `NewPunch` log for `entry` to every open subscription.
    pub fn emit_log(&self, entry: &RawEntry) {
        self.emit_log_object(self.chain.log_object(entry, false));
    }

    /// Delivers a `NewPunch` log flagged as removed by a reorg.
    pub fn emit_removed_log(&self, entry: &RawEntry) {
        self.emit_log_object(self.chain.log_object(entry, true));
    }

    fn emit_log_object(&self, log: Value) {
        let subscriptions = self.lock().subscriptions.clone();
        for id in subscriptions {
            self.emit_message(&id, log.clone());
        }
    }

    /// Mines pending transactions and delivers their logs.
    pub fn mine(&self) -> Vec<RawEntry> {
        let mined = self.chain.mine();
        for entry in &mined {
            self.emit_log(entry);
        }
        mined
    }

    fn dispatch(&self, method: &str, params: &Value) -> Action {
        let mut state = self.lock();
        match method {
            "eth_accounts" => Action::Reply(Ok(accounts_json(state.authorized))),
            "eth_chainId" => Action::Reply(Ok(json!(state.chain_id.to_string()))),
            "eth_requestAccounts" => {
                state.prompts += 1;
                match state.connect {
                    ConnectBehavior::Approve(account) => {
                        state.authorized = Some(account);
                        Action::Reply(Ok(accounts_json(Some(account))))
                    }
                    ConnectBehavior::Reject => Action::Reply(Err(rejected())),
                    ConnectBehavior::Pending => Action::Hang,
                }
            }
            "eth_sendTransaction" => {
                state.signs += 1;
                let sign = state.sign;
                match sign {
                    SignBehavior::Approve => {
                        drop(state);
                        Action::Reply(self.accept_transaction(params))
                    }
                    SignBehavior::Reject => Action::Reply(Err(rejected())),
                    SignBehavior::InsufficientFunds => Action::Reply(Err(RpcError::Rpc {
                        code: -32000,
                        message: "insufficient funds for gas * price + value".into(),
                    })),
                    SignBehavior::Pending => Action::Hang,
                }
            }
            "eth_subscribe" => {
                if params[0] != "logs" {
                    return Action::Reply(Err(RpcError::Rpc {
                        code: -32602,
                        message: "only logs subscriptions are supported".into(),
                    }));
                }
                let id = format!("{:#x}", state.next_subscription);
                state.next_subscription += 1;
                state.subscriptions.push(id.clone());
                Action::Reply(Ok(json!(id)))
            }
            "eth_unsubscribe" => {
                if state.unsubscribe_fails {
                    return Action::Reply(Err(RpcError::Unreachable(
                        "wallet transport closed".into(),
                    )));
                }
                let id = params[0].as_str().unwrap_or_default();
                let before = state.subscriptions.len();
                state.subscriptions.retain(|s| s != id);
                Action::Reply(Ok(json!(state.subscriptions.len() != before)))
            }
            _ => {
                drop(state);
                Action::Reply(self.chain.handle(method, params))
            }
        }
    }

    fn accept_transaction(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = &params[0];
        let from = tx["from"]
            .as_str()
            .and_then(|raw| raw.parse::<AccountId>().ok())
            .ok_or_else(|| RpcError::InvalidResponse("missing from".into()))?;
        let data = tx["data"]
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("missing data".into()))
            .and_then(|raw| parse_hex_bytes(raw, "data").map_err(RpcError::InvalidResponse))?;
        let hash = self.chain.submit(from, data);
        Ok(json!(to_hex(hash.as_bytes())))
    }
}

fn accounts_json(account: Option<AccountId>) -> Value {
    json!(account.map(|a| vec![a.to_string()]).unwrap_or_default())
}

fn rejected() -> RpcError {
    RpcError::Rpc {
        code: USER_REJECTED_CODE,
        message: "User rejected the request.".into(),
    }
}

#[async_trait]
impl RpcTransport for MockWallet {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match self.dispatch(method, &params) {
            Action::Reply(result) => result,
            Action::Hang => std::future::pending().await,
        }
    }
}

impl WalletTransport for MockWallet {
    fn events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    fn messages(&self) -> broadcast::Receiver<SubscriptionMessage> {
        self.messages.subscribe()
    }
}
