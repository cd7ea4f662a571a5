pub mod account;
pub mod amount;
pub mod chain;
pub mod counters;

pub use account::AccountId;
pub use amount::Amount;
pub use chain::ChainId;
pub use counters::AggregateCounters;
