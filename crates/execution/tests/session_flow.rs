//! End-to-end session tests against in-memory wallet and node doubles.
//!
//! Covers:
//! - Loading without a wallet through the fallback endpoint
//! - Connecting and submitting with the live event arriving before, after
//!   or never relative to the receipt
//! - Wallet account and chain changes
//! - Declined prompts, reverts and shutdown

use punch_domain::{AccountId, ChainId, ConnectionState, Origin};
use punch_execution::prelude::*;
use punch_protocols::punch::{RawEntry, WriterConfig};
use punch_protocols::testing::{ConnectBehavior, MockChain, MockRpc, MockWallet, SignBehavior};
use punch_protocols::wallet::WalletTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn account(byte: u8) -> AccountId {
    AccountId::from_bytes([byte; 20])
}

fn raw(byte: u8, ts: u64, payload: &str) -> RawEntry {
    RawEntry {
        author: account(byte),
        occurred_at: ts,
        payload: payload.to_string(),
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        writer: WriterConfig {
            receipt_poll_interval_ms: 5,
        },
        ..SessionConfig::default()
    }
}

/// Chain with five existing punches and a small balance.
fn seeded_chain() -> Arc<MockChain> {
    let chain = MockChain::new();
    for i in 1..=5u8 {
        chain.push_entry(raw(i, 1_000 + u64::from(i), &format!("punch {i}")));
    }
    chain.set_balance(500_000_000_000_000_000);
    chain
}

fn session_with_wallet(chain: &Arc<MockChain>, wallet: &Arc<MockWallet>) -> Arc<PunchSession> {
    let wallet: Arc<dyn WalletTransport> = wallet.clone();
    PunchSession::with_fallback(config(), Some(wallet), MockRpc::new(chain.clone()))
}

async fn wait_until<F>(session: &PunchSession, predicate: F) -> Arc<ViewSnapshot>
where
    F: Fn(&ViewSnapshot) -> bool,
{
    let mut rx = session.subscribe();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if predicate(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("snapshot publisher dropped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

async fn wait_for_mempool(chain: &MockChain) {
    tokio::time::timeout(TIMEOUT, async {
        while chain.pending_calldata().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("transaction never reached the mempool");
}

fn count_payload(snapshot: &ViewSnapshot, payload: &str) -> usize {
    snapshot
        .entries
        .iter()
        .filter(|e| e.payload == payload)
        .count()
}

// =============================================================================
// Without a wallet
// =============================================================================

#[tokio::test]
async fn test_load_without_wallet_reads_fallback() {
    init_tracing();
    let chain = seeded_chain();
    let rpc = MockRpc::new(chain.clone());
    let session = PunchSession::with_fallback(config(), None, rpc.clone());

    session.load().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SyncPhase::Ready);
    assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    assert!(!snapshot.wallet_available);
    assert_eq!(snapshot.connect_action(), ConnectAction::InstallWallet);
    assert_eq!(snapshot.counters.total_count, 5);
    assert_eq!(snapshot.entries.len(), 5);
    assert_eq!(snapshot.entries[0].payload, "punch 5");
    assert_eq!(snapshot.entries[4].payload, "punch 1");
    assert_eq!(
        snapshot.balance_ether().map(|d| d.to_string()),
        Some("0.5".to_string())
    );
    assert_eq!(rpc.call_count(), 3);
}

#[tokio::test]
async fn test_writes_refused_without_wallet() {
    init_tracing();
    let chain = seeded_chain();
    let session = PunchSession::with_fallback(config(), None, MockRpc::new(chain.clone()));
    session.load().await.unwrap();
    let mut notices = session.notifications();

    assert!(matches!(
        session.submit("hi").await,
        Err(SyncError::ProviderUnavailable(_))
    ));
    assert!(matches!(
        session.connect().await,
        Err(SyncError::ProviderUnavailable(_))
    ));

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NotificationLevel::Error);
    assert!(session.snapshot().pending.is_empty());
    assert!(chain.pending_calldata().is_empty());
}

#[tokio::test]
async fn test_seed_failure_keeps_session_usable() {
    init_tracing();
    let chain = seeded_chain();
    let rpc = MockRpc::new(chain.clone());
    let session = PunchSession::with_fallback(config(), None, rpc.clone());

    rpc.set_unreachable(true);
    assert!(matches!(
        session.load().await,
        Err(SyncError::NetworkUnavailable(_))
    ));
    assert_eq!(session.snapshot().phase, SyncPhase::Seeding);

    rpc.set_unreachable(false);
    session.refresh().await.unwrap();
    assert_eq!(session.snapshot().phase, SyncPhase::Ready);
    assert_eq!(session.snapshot().counters.total_count, 5);
}

// =============================================================================
// Connect and submit
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum LiveDelivery {
    BeforeReceipt,
    AfterReceipt,
    Never,
}

async fn connect_and_submit_hi(delivery: LiveDelivery) {
    init_tracing();
    let alice = account(0xa1);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.set_connect_behavior(ConnectBehavior::Approve(alice));
    let session = session_with_wallet(&chain, &wallet);

    session.load().await.unwrap();
    assert_eq!(session.snapshot().connect_action(), ConnectAction::Connect);
    assert_eq!(session.connect().await.unwrap(), alice);
    assert_eq!(wallet.prompt_count(), 1);
    assert_eq!(wallet.active_subscriptions(), 1);

    let snapshot = session.snapshot();
    assert!(snapshot.can_write());
    assert_eq!(snapshot.counters.total_count, 5);

    const MINED_AT: u64 = 2_000;
    chain.set_clock(MINED_AT);

    let submitter = session.clone();
    let submission = tokio::spawn(async move { submitter.submit("hi").await });
    wait_for_mempool(&chain).await;

    let snapshot = wait_until(&session, |s| {
        s.pending.len() == 1 && s.pending[0].tx_hash.is_some()
    })
    .await;
    assert_eq!(snapshot.pending[0].payload, "hi");
    assert_eq!(snapshot.pending[0].author, alice);
    assert_eq!(count_payload(&snapshot, "hi"), 0);
    assert_eq!(snapshot.counters.total_count, 5);

    let hi = raw(0xa1, MINED_AT, "hi");
    if let LiveDelivery::BeforeReceipt = delivery {
        wallet.emit_log(&hi);
        let snapshot = wait_until(&session, |s| count_payload(s, "hi") == 1).await;
        assert_eq!(snapshot.counters.total_count, 6);
    }

    let mined = chain.mine();
    assert_eq!(mined, vec![hi.clone()]);

    let receipt = tokio::time::timeout(TIMEOUT, submission)
        .await
        .expect("submission never finished")
        .unwrap()
        .unwrap();
    assert!(receipt.success);

    if let LiveDelivery::AfterReceipt = delivery {
        wallet.emit_log(&hi);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let snapshot = wait_until(&session, |s| s.pending.is_empty()).await;
    assert_eq!(count_payload(&snapshot, "hi"), 1, "{delivery:?}");
    assert_eq!(snapshot.counters.total_count, 6, "{delivery:?}");
    assert_eq!(snapshot.entries.len(), 6);
    assert_eq!(snapshot.entries[0].payload, "hi");
    assert_eq!(snapshot.entries[0].origin, Origin::Seed);
    assert_eq!(snapshot.phase, SyncPhase::Ready);

    session.shutdown().await;
    assert_eq!(wallet.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_submit_with_live_event_before_receipt() {
    connect_and_submit_hi(LiveDelivery::BeforeReceipt).await;
}

#[tokio::test]
async fn test_submit_with_live_event_after_receipt() {
    connect_and_submit_hi(LiveDelivery::AfterReceipt).await;
}

#[tokio::test]
async fn test_submit_without_live_event() {
    connect_and_submit_hi(LiveDelivery::Never).await;
}

#[tokio::test]
async fn test_reads_go_through_wallet_on_expected_chain() {
    init_tracing();
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    let rpc = MockRpc::new(chain.clone());
    let transport: Arc<dyn WalletTransport> = wallet.clone();
    let session = PunchSession::with_fallback(config(), Some(transport), rpc.clone());

    session.load().await.unwrap();
    assert_eq!(session.snapshot().counters.total_count, 5);
    assert_eq!(rpc.call_count(), 0);
}

#[tokio::test]
async fn test_declined_connection_is_silent() {
    init_tracing();
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.set_connect_behavior(ConnectBehavior::Reject);
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();
    let mut notices = session.notifications();

    assert_eq!(session.connect().await, Err(SyncError::UserDeclined));
    assert_eq!(wallet.prompt_count(), 1);
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(session.snapshot().connection, ConnectionState::Disconnected);
    assert_eq!(wallet.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_declined_signature_clears_pending() {
    init_tracing();
    let alice = account(0xa1);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(alice);
    wallet.set_sign_behavior(SignBehavior::Reject);
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    assert_eq!(session.submit("hi").await.err(), Some(SyncError::UserDeclined));
    let snapshot = session.snapshot();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.counters.total_count, 5);
}

#[tokio::test]
async fn test_reverted_submission() {
    init_tracing();
    let alice = account(0xa1);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(alice);
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();
    let mut notices = session.notifications();

    let submitter = session.clone();
    let submission = tokio::spawn(async move { submitter.submit("hi").await });
    wait_for_mempool(&chain).await;
    chain.revert_pending();

    let result = tokio::time::timeout(TIMEOUT, submission)
        .await
        .expect("submission never finished")
        .unwrap();
    assert!(matches!(result, Err(SyncError::ContractReverted(_))));

    let snapshot = session.snapshot();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.counters.total_count, 5);
    assert_eq!(count_payload(&snapshot, "hi"), 0);

    let mut levels = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        levels.push(notice.level);
    }
    assert_eq!(levels.last(), Some(&NotificationLevel::Error));
}

#[tokio::test]
async fn test_invalid_payload_never_prompts() {
    init_tracing();
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(account(0xa1));
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    assert!(matches!(
        session.submit("  ").await,
        Err(SyncError::InvalidPayload(_))
    ));
    assert_eq!(wallet.sign_count(), 0);
    assert!(session.snapshot().pending.is_empty());
}

// =============================================================================
// Wallet changes
// =============================================================================

#[tokio::test]
async fn test_restores_authorized_account_without_prompt() {
    init_tracing();
    let alice = account(0xa1);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(alice);
    let session = session_with_wallet(&chain, &wallet);

    session.load().await.unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.connection, ConnectionState::Connected(alice));
    assert_eq!(snapshot.chain, Some(ChainId::RINKEBY));
    assert!(snapshot.can_write());
    assert_eq!(wallet.prompt_count(), 0);
    assert_eq!(wallet.active_subscriptions(), 1);
}

#[tokio::test]
async fn test_account_changes_resubscribe() {
    init_tracing();
    let alice = account(0xa1);
    let bob = account(0xb0);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(alice);
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    wallet.switch_account(None);
    wait_until(&session, |s| s.connection == ConnectionState::Disconnected).await;
    tokio::time::timeout(TIMEOUT, async {
        while wallet.active_subscriptions() != 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("subscription was not released");

    wallet.switch_account(Some(bob));
    wait_until(&session, |s| s.connection == ConnectionState::Connected(bob)).await;
    tokio::time::timeout(TIMEOUT, async {
        while wallet.active_subscriptions() != 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("subscription was not re-established");
    assert_eq!(wallet.prompt_count(), 0);

    session.shutdown().await;
    assert_eq!(wallet.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_account_switch_survives_log_burst() {
    init_tracing();
    let alice = account(0xa1);
    let bob = account(0xb0);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(alice);
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    wallet.switch_account(Some(bob));
    for i in 0..70u64 {
        wallet.emit_log(&raw(0xc0, 2_000 + i, &format!("burst {i}")));
    }

    let snapshot = wait_until(&session, |s| s.connection == ConnectionState::Connected(bob)).await;
    assert!(snapshot.can_write());

    // Redelivery is harmless, so keep emitting until the new subscription sees it.
    let marker = raw(0xc1, 3_000, "after switch");
    tokio::time::timeout(TIMEOUT, async {
        while count_payload(&session.snapshot(), "after switch") == 0 {
            wallet.emit_log(&marker);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("live entries stopped after the account switch");
    assert_eq!(count_payload(&session.snapshot(), "after switch"), 1);
    assert_eq!(wallet.active_subscriptions(), 1);
    assert_eq!(wallet.prompt_count(), 0);
}

#[tokio::test]
async fn test_missed_wallet_events_are_recovered() {
    init_tracing();
    let alice = account(0xa1);
    let bob = account(0xb0);
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(alice);
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    // More notifications than the wallet buffers; the switch is overwritten.
    wallet.switch_account(Some(bob));
    for _ in 0..70 {
        wallet.switch_chain(ChainId::RINKEBY);
    }

    let snapshot = wait_until(&session, |s| s.connection == ConnectionState::Connected(bob)).await;
    assert_eq!(snapshot.chain, Some(ChainId::RINKEBY));
    assert_eq!(wallet.prompt_count(), 0);
}

#[tokio::test]
async fn test_wrong_chain_blocks_writes() {
    init_tracing();
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(account(0xa1));
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    wallet.switch_chain(ChainId::MAINNET);
    let snapshot = wait_until(&session, |s| s.chain == Some(ChainId::MAINNET)).await;
    assert!(!snapshot.can_write());

    assert_eq!(
        session.submit("hi").await.err(),
        Some(SyncError::WrongNetwork {
            expected: ChainId::RINKEBY,
            actual: ChainId::MAINNET,
        })
    );
    assert_eq!(wallet.sign_count(), 0);

    wallet.switch_chain(ChainId::RINKEBY);
    let snapshot = wait_until(&session, |s| s.chain == Some(ChainId::RINKEBY)).await;
    assert!(snapshot.can_write());
}

#[tokio::test]
async fn test_disconnect_event() {
    init_tracing();
    let chain = seeded_chain();
    let wallet = MockWallet::new(chain.clone());
    wallet.authorize(account(0xa1));
    let session = session_with_wallet(&chain, &wallet);
    session.load().await.unwrap();

    wallet.disconnect();
    let snapshot = wait_until(&session, |s| !s.connection.is_connected()).await;
    assert_eq!(snapshot.chain, None);
    assert!(!snapshot.can_write());
}
