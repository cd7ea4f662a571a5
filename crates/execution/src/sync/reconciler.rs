//! Reconciler merging seeds, live events and wallet state into one snapshot.

use super::snapshot::{PendingPunch, SeedBatch, SyncPhase, ViewSnapshot};
use primitive_types::H256;
use punch_domain::{AggregateCounters, ChainId, ConnectionState, DedupKey, Entry, Origin};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one seed read, in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeedTicket(u64);

/// Owner of the published [`ViewSnapshot`].
///
/// Every mutation runs inside the watch channel's write lock and replaces
/// the snapshot with a new `Arc`, so readers always see a complete value
/// and concurrent callers are applied one after another.
pub struct Reconciler {
    /// Published snapshot.
    state: watch::Sender<Arc<ViewSnapshot>>,
    /// Last ticket handed out.
    issued: AtomicU64,
    /// Ticket of the last applied seed.
    applied: AtomicU64,
}

impl Reconciler {
    /// Creates a reconciler in the `Empty` phase.
    pub fn new(expected_chain: ChainId, wallet_available: bool) -> Self {
        let (state, _) = watch::channel(Arc::new(ViewSnapshot::new(
            expected_chain,
            wallet_available,
        )));
        Self {
            state,
            issued: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewSnapshot>> {
        self.state.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.state.borrow().phase
    }

    /// Applies `modify` to a copy of the snapshot and publishes it if
    /// `modify` reports a change.
    fn apply<F>(&self, modify: F) -> bool
    where
        F: FnOnce(&mut ViewSnapshot) -> bool,
    {
        self.state.send_if_modified(|current| {
            let mut next = ViewSnapshot::clone(current);
            if !modify(&mut next) {
                return false;
            }
            next.version = current.version + 1;
            *current = Arc::new(next);
            true
        })
    }

    /// Starts a seed and returns its ticket.
    pub fn begin_seed(&self) -> SeedTicket {
        let ticket = SeedTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1);
        self.apply(|s| {
            if s.phase != SyncPhase::Empty {
                return false;
            }
            s.phase = SyncPhase::Seeding;
            true
        });
        debug!(ticket = ticket.0, "Seed started");
        ticket
    }

    /// Replaces entries and counters with an authoritative read.
    ///
    /// Returns false when a newer seed was already applied.
    pub fn seed(&self, ticket: SeedTicket, batch: SeedBatch) -> bool {
        let total_count = batch.total_count;
        let applied = self.apply(|s| {
            if ticket.0 <= self.applied.load(Ordering::SeqCst) {
                return false;
            }
            self.applied.store(ticket.0, Ordering::SeqCst);
            s.entries = merge_seed(batch.entries);
            s.counters = AggregateCounters::new(batch.total_count, batch.balance);
            s.phase = SyncPhase::Ready;
            true
        });

        if applied {
            let snapshot = self.snapshot();
            info!(
                ticket = ticket.0,
                entries = snapshot.entries.len(),
                count = total_count,
                balance = %snapshot.counters.balance,
                "Applied seed"
            );
        } else {
            debug!(ticket = ticket.0, "Discarded stale seed");
        }
        applied
    }

    /// Records a failed seed. Phase and contents are left untouched.
    pub fn seed_failed(&self, ticket: SeedTicket, error: &dyn fmt::Display) {
        warn!(
            ticket = ticket.0,
            phase = ?self.phase(),
            error = %error,
            "Seed failed, keeping last snapshot"
        );
    }

    /// Inserts a live entry unless an entry with the same key is present.
    ///
    /// Returns true if the entry was new.
    pub fn observe_live(&self, entry: Entry) -> bool {
        let entry = Entry {
            origin: Origin::Live,
            ..entry
        };
        let author = entry.author;
        let occurred_at = entry.occurred_at;

        let inserted = self.apply(|s| {
            if s.entries.iter().any(|e| same_key(e, &entry)) {
                return false;
            }
            let at = s
                .entries
                .iter()
                .position(|e| e.occurred_at <= entry.occurred_at)
                .unwrap_or(s.entries.len());
            s.entries.insert(at, entry);
            s.counters.total_count = s.counters.total_count.saturating_add(1);
            true
        });

        if inserted {
            info!(author = %author, occurred_at = occurred_at, "Observed live entry");
        } else {
            debug!(author = %author, occurred_at = occurred_at, "Ignored duplicate live entry");
        }
        inserted
    }

    /// Sets the wallet connection.
    pub fn set_connection(&self, connection: ConnectionState) -> bool {
        let changed = self.apply(|s| {
            if s.connection == connection {
                return false;
            }
            s.connection = connection;
            true
        });
        if changed {
            info!(account = ?connection.account().map(|a| a.to_string()), "Connection changed");
        }
        changed
    }

    /// Sets the chain the wallet reports.
    pub fn set_chain(&self, chain: Option<ChainId>) -> bool {
        let changed = self.apply(|s| {
            if s.chain == chain {
                return false;
            }
            s.chain = chain;
            true
        });
        if changed {
            info!(chain = ?chain.map(|c| c.to_string()), "Wallet chain changed");
        }
        changed
    }

    /// Adds a submission to the pending overlay.
    pub fn add_pending(&self, pending: PendingPunch) -> Uuid {
        let id = pending.id;
        self.apply(|s| {
            s.pending.push(pending);
            true
        });
        debug!(pending_id = %id, "Added pending punch");
        id
    }

    /// Records the transaction hash of a pending submission.
    pub fn set_pending_tx(&self, id: Uuid, tx_hash: H256) -> bool {
        self.apply(|s| match s.pending.iter_mut().find(|p| p.id == id) {
            Some(pending) if pending.tx_hash != Some(tx_hash) => {
                pending.tx_hash = Some(tx_hash);
                true
            }
            _ => false,
        })
    }

    /// Removes a terminated submission from the pending overlay.
    pub fn resolve_pending(&self, id: Uuid) -> bool {
        let removed = self.apply(|s| {
            let before = s.pending.len();
            s.pending.retain(|p| p.id != id);
            s.pending.len() != before
        });
        if removed {
            debug!(pending_id = %id, "Resolved pending punch");
        }
        removed
    }
}

fn same_key(a: &Entry, b: &Entry) -> bool {
    a.author == b.author && a.occurred_at == b.occurred_at && a.payload == b.payload
}

/// Deduplicates a chain-ordered batch into newest-first display order.
///
/// Within the batch a `Seed` entry replaces a `Live` one with the same key.
fn merge_seed(entries: Vec<Entry>) -> Vec<Entry> {
    let mut merged: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<DedupKey, usize> = HashMap::with_capacity(entries.len());

    for entry in entries.into_iter().rev() {
        let key = entry.key();
        match index.get(&key).copied() {
            Some(i) => {
                if merged[i].origin == Origin::Live && entry.origin == Origin::Seed {
                    merged[i] = entry;
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(entry);
            }
        }
    }
    merged
}
