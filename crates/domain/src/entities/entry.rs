use crate::enums::Origin;
use crate::errors::DomainError;
use crate::value_objects::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest payload, in UTF-8 bytes, accepted for submission.
pub const MAX_PAYLOAD_BYTES: usize = 280;

/// Identity of an entry regardless of how it was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub author: AccountId,
    pub occurred_at: u64,
    pub payload: String,
}

/// One punch recorded on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub author: AccountId,
    /// Block timestamp supplied by the contract, in seconds.
    pub occurred_at: u64,
    pub payload: String,
    pub origin: Origin,
}

impl Entry {
    pub fn new(author: AccountId, occurred_at: u64, payload: impl Into<String>, origin: Origin) -> Self {
        Self {
            author,
            occurred_at,
            payload: payload.into(),
            origin,
        }
    }

    pub fn seed(author: AccountId, occurred_at: u64, payload: impl Into<String>) -> Self {
        Self::new(author, occurred_at, payload, Origin::Seed)
    }

    pub fn live(author: AccountId, occurred_at: u64, payload: impl Into<String>) -> Self {
        Self::new(author, occurred_at, payload, Origin::Live)
    }

    pub fn key(&self) -> DedupKey {
        DedupKey {
            author: self.author,
            occurred_at: self.occurred_at,
            payload: self.payload.clone(),
        }
    }

    pub fn occurred_at_utc(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.occurred_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Checks a payload before it is sent to the contract.
pub fn validate_payload(payload: &str) -> Result<(), DomainError> {
    if payload.trim().is_empty() {
        return Err(DomainError::InvalidPayload("payload is empty".to_string()));
    }
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(DomainError::InvalidPayload(format!(
            "payload is {} bytes, limit is {MAX_PAYLOAD_BYTES}",
            payload.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_origin() {
        let author = AccountId::from_bytes([1; 20]);
        let seed = Entry::seed(author, 10, "hi");
        let live = Entry::live(author, 10, "hi");
        assert_ne!(seed, live);
        assert_eq!(seed.key(), live.key());
    }

    #[test]
    fn test_occurred_at_utc() {
        let entry = Entry::seed(AccountId::from_bytes([1; 20]), 1_650_000_000, "x");
        assert_eq!(entry.occurred_at_utc().unwrap().timestamp(), 1_650_000_000);
    }

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload("hi").is_ok());
        assert!(validate_payload("   ").is_err());
        assert!(validate_payload(&"a".repeat(MAX_PAYLOAD_BYTES + 1)).is_err());
    }
}
