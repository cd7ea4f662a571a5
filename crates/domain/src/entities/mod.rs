pub mod entry;

pub use entry::{DedupKey, Entry, MAX_PAYLOAD_BYTES, validate_payload};
