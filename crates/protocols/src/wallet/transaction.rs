//! Transaction requests and receipts.

use crate::codec::{parse_h256, parse_hex_u64, to_hex};
use primitive_types::H256;
use punch_domain::AccountId;
use serde::Deserialize;
use serde_json::{Value, json};

/// A transaction for the wallet to sign and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Sender; must be the connected account.
    pub from: AccountId,
    /// Target contract.
    pub to: AccountId,
    /// ABI-encoded call data.
    pub data: Vec<u8>,
}

impl TransactionRequest {
    /// Renders the request as an `eth_sendTransaction` parameter object.
    pub fn to_json(&self) -> Value {
        json!({
            "from": self.from.to_string(),
            "to": self.to.to_string(),
            "data": to_hex(&self.data),
            "value": "0x0",
        })
    }
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub tx_hash: H256,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas used, when reported.
    pub gas_used: Option<u64>,
}

#[derive(Deserialize)]
struct RpcReceipt {
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
    #[serde(rename = "gasUsed")]
    gas_used: Option<String>,
}

impl TransactionReceipt {
    /// Parses an `eth_getTransactionReceipt` result.
    ///
    /// Returns `Ok(None)` while the transaction is still pending.
    pub fn from_rpc(value: Value) -> Result<Option<Self>, String> {
        if value.is_null() {
            return Ok(None);
        }
        let raw: RpcReceipt =
            serde_json::from_value(value).map_err(|e| format!("malformed receipt: {e}"))?;
        let Some(block_number) = raw.block_number else {
            return Ok(None);
        };
        let block_number = parse_hex_u64(&block_number, "blockNumber")?;
        // Receipts from before EIP-658 carry no status.
        let success = match raw.status.as_deref() {
            Some(status) => parse_hex_u64(status, "status")? == 1,
            None => true,
        };
        let gas_used = raw
            .gas_used
            .as_deref()
            .map(|g| parse_hex_u64(g, "gasUsed"))
            .transpose()?;
        Ok(Some(Self {
            tx_hash: parse_h256(&raw.transaction_hash, "transactionHash")?,
            block_number,
            success,
            gas_used,
        }))
    }
}
