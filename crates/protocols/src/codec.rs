//! Hex encoding of JSON-RPC quantities and data blobs.

use primitive_types::H256;

/// Parses a `0x`-prefixed hex quantity into a `u64`.
pub fn parse_hex_u64(raw: &str, field: &str) -> Result<u64, String> {
    let digits = strip_prefix(raw, field)?;
    u64::from_str_radix(digits, 16).map_err(|e| format!("failed to parse {field} as hex u64: {e}"))
}

/// Decodes a `0x`-prefixed data blob.
pub fn parse_hex_bytes(raw: &str, field: &str) -> Result<Vec<u8>, String> {
    let digits = strip_prefix(raw, field)?;
    hex::decode(digits).map_err(|e| format!("{field} is not valid hex: {e}"))
}

/// Decodes a 32-byte hash such as a transaction hash or log topic.
pub fn parse_h256(raw: &str, field: &str) -> Result<H256, String> {
    let bytes = parse_hex_bytes(raw, field)?;
    if bytes.len() != 32 {
        return Err(format!("{field} must be 32 bytes, got {}", bytes.len()));
    }
    Ok(H256::from_slice(&bytes))
}

/// Renders bytes as `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Renders a `u64` as a JSON-RPC hex quantity.
pub fn to_hex_quantity(value: u64) -> String {
    format!("{value:#x}")
}

fn strip_prefix<'a>(raw: &'a str, field: &str) -> Result<&'a str, String> {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))
}
