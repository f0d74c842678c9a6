//! Minimal Ethereum JSON-RPC client over reqwest.
//!
//! Only the handful of methods the vault gateway needs are wrapped; results
//! are decoded straight into alloy primitives (hex quantities and data).

use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("RPC decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// Message including revert data, for error classification.
    pub fn detail(&self) -> String {
        match self {
            RpcError::Rpc {
                message,
                data: Some(data),
                ..
            } => format!("{} ({})", message, data),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Subset of an `eth_getTransactionReceipt` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    pub gas_used: U64,
    /// `0x1` success, `0x0` reverted
    #[serde(default)]
    pub status: Option<U64>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s == U64::from(1)).unwrap_or(false)
    }
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("RPC {} #{}", method, id);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("{} failed: {}", method, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RpcError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{} response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data.map(|d| match d {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            });
        }

        let result = parsed.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| RpcError::Decode(format!("{} result: {}", method, e)))
    }

    /// `eth_call` against the latest block.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Bytes, RpcError> {
        self.request(
            "eth_call",
            json!([{ "to": to, "data": Bytes::copy_from_slice(data) }, "latest"]),
        )
        .await
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    /// Account nonce including transactions still in the mempool.
    pub async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError> {
        let nonce: U64 = self
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(nonce.to::<u64>())
    }

    pub async fn gas_price(&self) -> Result<U256, RpcError> {
        self.request("eth_gasPrice", json!([])).await
    }

    pub async fn estimate_gas(&self, from: Address, to: Address, data: &[u8]) -> Result<u64, RpcError> {
        let gas: U64 = self
            .request(
                "eth_estimateGas",
                json!([{ "from": from, "to": to, "data": Bytes::copy_from_slice(data) }]),
            )
            .await?;
        Ok(gas.to::<u64>())
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, RpcError> {
        self.request(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw))]),
        )
        .await
    }

    /// `None` while the transaction is not yet mined.
    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([hash])).await
    }
}
