// Path: crates/chain/src/rpc.rs
//! Thin typed JSON-RPC client.
//!
//! Single-shot calls only; retry policy belongs to the call sites because
//! every consumer has a different ladder. The construction-time timeout
//! bounds each HTTP round trip.

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::SolCall;
use mech_types::error::RpcError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC client bound to one node URL.
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

/// Transaction receipt in the node's wire shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    /// "0x1" on success.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
    #[serde(default)]
    pub block_number: Option<String>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1"))
    }
}

/// One receipt log entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            request_id: AtomicU64::new(1),
        })
    }

    /// Raw JSON-RPC request; returns the `result` value.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout(method.to_string())
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(err) = parsed.get("error") {
            return Err(RpcError::Remote {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        parsed
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode(format!("{method}: response missing result")))
    }

    /// `eth_call` of an ABI-typed view function, decoded to its return type.
    pub async fn call<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, RpcError> {
        let data = call.abi_encode();
        let result = self
            .request(
                "eth_call",
                json!([{ "to": format!("{to:#x}"), "data": format!("0x{}", hex::encode(&data)) }, "latest"]),
            )
            .await?;
        let raw = parse_bytes(&result)?;
        C::abi_decode_returns(&raw).map_err(|e| RpcError::Decode(format!("{}: {e}", C::SIGNATURE)))
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        let result = self
            .request("eth_getCode", json!([format!("{address:#x}"), "latest"]))
            .await?;
        parse_bytes(&result)
    }

    /// `eth_getTransactionCount` at the given block tag (`latest`/`pending`).
    pub async fn transaction_count(&self, address: Address, tag: &str) -> Result<u64, RpcError> {
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([format!("{address:#x}"), tag]),
            )
            .await?;
        parse_hex_u64(&result)
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        parse_hex_u128(&result)
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_hex_u64(&result)
    }

    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: &[u8],
    ) -> Result<u64, RpcError> {
        let result = self
            .request(
                "eth_estimateGas",
                json!([{
                    "from": format!("{from:#x}"),
                    "to": format!("{to:#x}"),
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;
        parse_hex_u64(&result)
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, RpcError> {
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        parse_b256(&result)
    }

    /// Receipt for a hash; `None` while the transaction is unmined or
    /// unknown to the node.
    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([format!("{hash:#x}")]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| RpcError::Decode(format!("receipt: {e}")))
    }
}

fn parse_bytes(value: &Value) -> Result<Bytes, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode("expected hex string".to_string()))?;
    s.parse::<Bytes>()
        .map_err(|e| RpcError::Decode(format!("bad hex bytes: {e}")))
}

fn parse_b256(value: &Value) -> Result<B256, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode("expected hex string".to_string()))?;
    s.parse::<B256>()
        .map_err(|e| RpcError::Decode(format!("bad 32-byte hex: {e}")))
}

fn parse_hex_u64(value: &Value) -> Result<u64, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode("expected hex quantity".to_string()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Decode(format!("bad u64 quantity '{s}': {e}")))
}

fn parse_hex_u128(value: &Value) -> Result<u128, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode("expected hex quantity".to_string()))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Decode(format!("bad u128 quantity '{s}': {e}")))
}
