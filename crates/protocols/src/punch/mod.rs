//! Punch contract adapter.
//!
//! This module provides functionality to interact with the punch board:
//! - ABI encoding and decoding
//! - Reading counters, entries and balance
//! - Submitting punches and awaiting confirmation

/// ABI layout of calls, return values and events.
pub mod abi;
/// Writer for state-changing calls.
pub mod executor;
/// Reader for contract state.
pub mod reader;

pub use abi::{AbiError, RawEntry};
pub use executor::{ContractWriter, PendingTransaction, WriteError, WriterConfig};
pub use reader::{ContractReader, ContractState, ReadError};

use punch_domain::{AccountId, ChainId};

/// Punch board deployment on Rinkeby,
/// `0x04b065b6B54Ef2171f36ceaE90E2689171514C17`.
pub const DEFAULT_CONTRACT_ADDRESS: AccountId = AccountId::from_bytes([
    0x04, 0xb0, 0x65, 0xb6, 0xb5, 0x4e, 0xf2, 0x17, 0x1f, 0x36, 0xce, 0xae, 0x90, 0xe2, 0x68, 0x91,
    0x71, 0x51, 0x4c, 0x17,
]);

/// Where the contract lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractConfig {
    /// Contract address.
    pub address: AccountId,
    /// Chain the contract is deployed on.
    pub expected_chain: ChainId,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONTRACT_ADDRESS,
            expected_chain: ChainId::RINKEBY,
        }
    }
}
