//! JSON-RPC transport for read-only node access.
//!
//! The fallback endpoint is used whenever no wallet is injected, so the
//! board stays readable for visitors without an extension.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default read-only endpoint for the Rinkeby deployment.
pub const DEFAULT_RPC_URL: &str = "https://eth-rinkeby.alchemyapi.io/v2/demo";

/// Errors surfaced by any JSON-RPC transport, wallet or HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The endpoint could not be reached or answered with a non-2xx status.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The endpoint answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC or EIP-1193 error code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// The response was not a well-formed JSON-RPC response.
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Returns the error code when the endpoint supplied one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Builds an error from a JSON-RPC `error` object.
    pub fn from_error_object(error: &Value) -> Self {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Self::Rpc { code, message }
    }
}

/// Anything that can answer JSON-RPC requests.
///
/// Implementations return the `result` member of the response.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Performs a single request.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Endpoint URL.
    pub url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            timeout_secs: 15,
        }
    }
}

/// HTTP JSON-RPC client for the read-only fallback endpoint.
///
/// Stateless apart from the request id counter, so one instance can be
/// shared by any number of concurrent reads.
pub struct RpcProvider {
    /// HTTP client.
    client: reqwest::Client,
    /// Configuration.
    config: RpcConfig,
    /// Next request id.
    next_id: AtomicU64,
}

impl RpcProvider {
    /// Creates a new provider.
    pub fn new(config: RpcConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for RpcProvider {
    fn default() -> Self {
        Self::new(RpcConfig::default())
    }
}

#[async_trait]
impl RpcTransport for RpcProvider {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        debug!(method = method, id = id, "Sending rpc request");

        let response = self
            .client
            .post(&self.config.url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(method = method, error = %e, "Rpc endpoint unreachable");
                RpcError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Unreachable(format!(
                "{method} returned http status {status}"
            )));
        }

        let value: Value = response.json().await.map_err(|e| {
            RpcError::InvalidResponse(format!("failed to parse {method} response: {e}"))
        })?;

        extract_result(method, value)
    }
}

/// Pulls `result` out of a JSON-RPC response envelope.
pub fn extract_result(method: &str, mut response: Value) -> Result<Value, RpcError> {
    if let Some(error) = response.get("error") {
        return Err(RpcError::from_error_object(error));
    }
    response
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::InvalidResponse(format!("{method} result was missing")))
}
