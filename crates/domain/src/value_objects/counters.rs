use super::Amount;
use serde::{Deserialize, Serialize};

/// Totals shown next to the entry list.
///
/// Both values come from authoritative reads. Live events may bump
/// `total_count`; nothing but a read ever changes `balance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateCounters {
    pub total_count: u64,
    pub balance: Amount,
}

impl AggregateCounters {
    pub fn new(total_count: u64, balance: Amount) -> Self {
        Self {
            total_count,
            balance,
        }
    }
}
