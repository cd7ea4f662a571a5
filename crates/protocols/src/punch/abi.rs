//! ABI layout of the punch contract.
//!
//! ```text
//! struct Punch { address puncher; string message; uint256 timestamp; }
//! function punch(string)
//! function getTotalPunches() returns (uint256)
//! function getAllPunches() returns (Punch[])
//! event NewPunch(address indexed from, uint256 timestamp, string message)
//! ```

use primitive_types::{H256, U256};
use punch_domain::AccountId;
use thiserror::Error;

/// `keccak256("punch(string)")[..4]`.
pub const PUNCH_SELECTOR: [u8; 4] = [0x1d, 0x7b, 0x9b, 0x94];

/// `keccak256("getTotalPunches()")[..4]`.
pub const GET_TOTAL_PUNCHES_SELECTOR: [u8; 4] = [0x4b, 0x21, 0x78, 0x08];

/// `keccak256("getAllPunches()")[..4]`.
pub const GET_ALL_PUNCHES_SELECTOR: [u8; 4] = [0x9b, 0xcf, 0xc9, 0x32];

/// `keccak256("NewPunch(address,uint256,string)")`.
pub const NEW_PUNCH_TOPIC: [u8; 32] = [
    0xa3, 0x5f, 0x35, 0x5e, 0x23, 0xec, 0x07, 0x67, 0x30, 0x9d, 0x4c, 0xb5, 0xda, 0x76, 0x55, 0x12,
    0x4d, 0xb1, 0x4a, 0x88, 0x0f, 0x63, 0xb1, 0x1d, 0x8d, 0xaf, 0x51, 0xb4, 0xf3, 0xc0, 0xf8, 0x18,
];

const WORD: usize = 32;

/// Errors raised while decoding ABI data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("read of {needed} bytes at offset {offset} exceeds {len} bytes of data")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("{0} does not fit the target integer")]
    Overflow(&'static str),
    #[error("unexpected log topic")]
    WrongTopic,
    #[error("unexpected topic count {0}")]
    UnexpectedTopics(usize),
}

/// A punch as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Puncher address.
    pub author: AccountId,
    /// Block timestamp in seconds.
    pub occurred_at: u64,
    /// Message text.
    pub payload: String,
}

/// Call data for `punch(string)`.
pub fn encode_punch_call(payload: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD + padded_len(payload.len()));
    data.extend_from_slice(&PUNCH_SELECTOR);
    data.extend_from_slice(&usize_word(WORD));
    data.extend_from_slice(&string_tail(payload));
    data
}

/// Decodes the `uint256` returned by `getTotalPunches()`.
pub fn decode_total_punches(data: &[u8]) -> Result<u64, AbiError> {
    read_u64(data, 0, "total punches")
}

/// Decodes the `Punch[]` returned by `getAllPunches()`, in contract order.
pub fn decode_all_punches(data: &[u8]) -> Result<Vec<RawEntry>, AbiError> {
    let array = read_usize(data, 0)?;
    let count = read_usize(data, array)?;
    let content = array.saturating_add(WORD);

    // Each element needs at least one offset word; reject absurd lengths
    // before allocating.
    let available = data.len().saturating_sub(content) / WORD;
    if count > available {
        return Err(AbiError::OutOfBounds {
            offset: content,
            needed: count.saturating_mul(WORD),
            len: data.len(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let tuple = content
            .checked_add(read_usize(data, content + i * WORD)?)
            .ok_or(AbiError::Overflow("tuple offset"))?;
        let author = AccountId::from_word(word(data, tuple)?);
        let message = tuple
            .checked_add(read_usize(data, tuple.saturating_add(WORD))?)
            .ok_or(AbiError::Overflow("message offset"))?;
        let payload = read_string(data, message)?;
        let occurred_at = read_u64(data, tuple.saturating_add(2 * WORD), "timestamp")?;
        entries.push(RawEntry {
            author,
            occurred_at,
            payload,
        });
    }
    Ok(entries)
}

/// Decodes a `NewPunch` log.
///
/// Accepts both the indexed-author layout (two topics) and a fully
/// non-indexed layout (one topic, author in the data).
pub fn decode_new_punch(topics: &[H256], data: &[u8]) -> Result<RawEntry, AbiError> {
    let topic0 = topics.first().ok_or(AbiError::UnexpectedTopics(0))?;
    if topic0.as_bytes() != NEW_PUNCH_TOPIC {
        return Err(AbiError::WrongTopic);
    }

    match topics.len() {
        2 => {
            let mut author_word = [0u8; 32];
            author_word.copy_from_slice(topics[1].as_bytes());
            let occurred_at = read_u64(data, 0, "timestamp")?;
            let message = read_usize(data, WORD)?;
            Ok(RawEntry {
                author: AccountId::from_word(&author_word),
                occurred_at,
                payload: read_string(data, message)?,
            })
        }
        1 => {
            let author = AccountId::from_word(word(data, 0)?);
            let occurred_at = read_u64(data, WORD, "timestamp")?;
            let message = read_usize(data, 2 * WORD)?;
            Ok(RawEntry {
                author,
                occurred_at,
                payload: read_string(data, message)?,
            })
        }
        n => Err(AbiError::UnexpectedTopics(n)),
    }
}

fn word(data: &[u8], offset: usize) -> Result<&[u8; 32], AbiError> {
    offset
        .checked_add(WORD)
        .and_then(|end| data.get(offset..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or(AbiError::OutOfBounds {
            offset,
            needed: WORD,
            len: data.len(),
        })
}

fn read_u256(data: &[u8], offset: usize) -> Result<U256, AbiError> {
    Ok(U256::from_big_endian(word(data, offset)?))
}

fn read_u64(data: &[u8], offset: usize, field: &'static str) -> Result<u64, AbiError> {
    let value = read_u256(data, offset)?;
    if value > U256::from(u64::MAX) {
        return Err(AbiError::Overflow(field));
    }
    Ok(value.low_u64())
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let value = read_u64(data, offset, "offset")?;
    usize::try_from(value).map_err(|_| AbiError::Overflow("offset"))
}

fn read_string(data: &[u8], offset: usize) -> Result<String, AbiError> {
    let len = read_usize(data, offset)?;
    let start = offset.saturating_add(WORD);
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or(AbiError::OutOfBounds {
            offset: start,
            needed: len,
            len: data.len(),
        })?;
    // Messages are stored as raw bytes; a lossy decode keeps seed and live
    // copies of the same punch byte-identical.
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

fn usize_word(value: usize) -> [u8; 32] {
    u64_word(value as u64)
}

/// Left-pads a `u64` to an ABI word.
pub fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Length word followed by the zero-padded bytes of `s`.
fn string_tail(s: &str) -> Vec<u8> {
    let mut tail = Vec::with_capacity(WORD + padded_len(s.len()));
    tail.extend_from_slice(&usize_word(s.len()));
    tail.extend_from_slice(s.as_bytes());
    tail.resize(WORD + padded_len(s.len()), 0);
    tail
}

/// Return data of `getAllPunches()` for the given entries.
#[cfg(any(test, feature = "testing"))]
pub fn encode_all_punches(entries: &[RawEntry]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = entries
        .iter()
        .map(|e| {
            let mut tuple = Vec::new();
            tuple.extend_from_slice(&e.author.to_word());
            tuple.extend_from_slice(&usize_word(3 * WORD));
            tuple.extend_from_slice(&u64_word(e.occurred_at));
            tuple.extend_from_slice(&string_tail(&e.payload));
            tuple
        })
        .collect();

    let mut data = Vec::new();
    data.extend_from_slice(&usize_word(WORD));
    data.extend_from_slice(&usize_word(entries.len()));
    let mut offset = entries.len() * WORD;
    for tuple in &tuples {
        data.extend_from_slice(&usize_word(offset));
        offset += tuple.len();
    }
    for tuple in tuples {
        data.extend_from_slice(&tuple);
    }
    data
}

/// Topics and data of a `NewPunch` log with an indexed author.
#[cfg(any(test, feature = "testing"))]
pub fn encode_new_punch(entry: &RawEntry) -> (Vec<H256>, Vec<u8>) {
    let topics = vec![
        H256::from(NEW_PUNCH_TOPIC),
        H256::from(entry.author.to_word()),
    ];
    let mut data = Vec::new();
    data.extend_from_slice(&u64_word(entry.occurred_at));
    data.extend_from_slice(&usize_word(2 * WORD));
    data.extend_from_slice(&string_tail(&entry.payload));
    (topics, data)
}

/// Extracts the message from `punch(string)` call data.
#[cfg(any(test, feature = "testing"))]
pub fn decode_punch_call(data: &[u8]) -> Result<String, AbiError> {
    if data.len() < 4 || data[..4] != PUNCH_SELECTOR {
        return Err(AbiError::WrongTopic);
    }
    let args = &data[4..];
    let offset = read_usize(args, 0)?;
    read_string(args, offset)
}
