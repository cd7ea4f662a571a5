//! Domain types for the Punch board: accounts, chains, amounts and entries.
//!
//! Nothing in this crate talks to a wallet or a node; it only defines the
//! values the protocol and execution crates pass around.

pub mod entities;
pub mod enums;
pub mod errors;
pub mod value_objects;

pub use entities::{DedupKey, Entry, MAX_PAYLOAD_BYTES, validate_payload};
pub use enums::{ConnectionState, Origin};
pub use errors::DomainError;
pub use value_objects::{AccountId, AggregateCounters, Amount, ChainId};
