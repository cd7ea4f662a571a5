use crate::value_objects::AccountId;
use serde::{Deserialize, Serialize};

/// Where an entry was observed. Only used to break dedup ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Authoritative bulk read of contract state.
    Seed,
    /// Live event notification.
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(AccountId),
}

impl ConnectionState {
    /// `Connected` when an account is authorized.
    pub fn from_account(account: Option<AccountId>) -> Self {
        match account {
            Some(account) => Self::Connected(account),
            None => Self::Disconnected,
        }
    }

    pub fn account(&self) -> Option<AccountId> {
        match self {
            Self::Connected(account) => Some(*account),
            Self::Disconnected => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}
