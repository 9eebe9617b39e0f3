// Path: crates/proxy/src/dispatch.rs
//! Safe-routed marketplace dispatch.
//!
//! Each content is uploaded to IPFS, then posted as a marketplace request
//! through the active service's Safe. Dispatches are serialized by Safe
//! nonce: one at a time, in call order.

use crate::identity::ActiveIdentity;
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use mech_chain::contracts::IMechMarketplace;
use mech_chain::RpcClient;
use mech_ipfs::IpfsStore;
use mech_types::error::ProxyError;
use mech_types::unix_now;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// `POST /dispatch` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Pre-built JSON contents; takes precedence over `prompts`.
    #[serde(default)]
    pub ipfs_json_contents: Vec<Value>,
    /// When set, the transaction is submitted without awaiting its receipt,
    /// so no request ids can be reported for it.
    #[serde(default)]
    pub post_only: bool,
    /// Absolute epoch seconds; clamped into the marketplace's window.
    #[serde(default)]
    pub response_timeout: Option<u64>,
}

/// `POST /dispatch` response data.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    pub request_ids: Vec<String>,
}

pub struct Dispatcher {
    rpc: Arc<RpcClient>,
    ipfs: Arc<IpfsStore>,
    receipt_deadline: Duration,
}

impl Dispatcher {
    pub fn new(rpc: Arc<RpcClient>, ipfs: Arc<IpfsStore>, receipt_deadline: Duration) -> Self {
        Self {
            rpc,
            ipfs,
            receipt_deadline,
        }
    }

    /// Runs one dispatch call under the caller-held serialization lock.
    pub async fn dispatch(
        &self,
        identity: &ActiveIdentity,
        request: DispatchRequest,
    ) -> Result<DispatchResponse, ProxyError> {
        let marketplace = identity
            .marketplace
            .ok_or_else(|| ProxyError::Validation("no marketplace configured".to_string()))?;

        let contents = if !request.ipfs_json_contents.is_empty() {
            request.ipfs_json_contents.clone()
        } else if !request.prompts.is_empty() {
            request
                .prompts
                .iter()
                .map(|p| json!({ "prompt": p, "tools": request.tools }))
                .collect()
        } else {
            return Err(ProxyError::Validation(
                "dispatch needs prompts or ipfsJsonContents".to_string(),
            ));
        };

        let response_timeout = self
            .clamped_timeout(marketplace, request.response_timeout)
            .await?;

        let mut request_ids = Vec::new();
        for content in &contents {
            let stored = self
                .ipfs
                .put_json(content)
                .await
                .map_err(|e| ProxyError::Upstream(e.to_string()))?;

            let calldata = IMechMarketplace::requestCall {
                data: stored.digest.as_slice().to_vec().into(),
                maxDeliveryRate: U256::ZERO,
                paymentType: B256::ZERO,
                priorityMech: identity.mech,
                responseTimeout: U256::from(response_timeout),
                paymentData: Vec::new().into(),
            }
            .abi_encode();

            let tx_hash = identity
                .router
                .exec_transaction(marketplace, calldata)
                .await
                .map_err(|e| ProxyError::Dispatch(e.to_string()))?;

            if request.post_only {
                tracing::info!(target: "proxy", event = "dispatch_posted", %tx_hash, cid = %stored.cid);
                continue;
            }

            let receipt = identity
                .router
                .await_receipt(tx_hash, self.receipt_deadline)
                .await
                .map_err(|e| ProxyError::Dispatch(e.to_string()))?;
            if !receipt.succeeded() {
                return Err(ProxyError::Dispatch(format!(
                    "marketplace request reverted in {tx_hash:#x}"
                )));
            }
            for log in &receipt.logs {
                if log.address != marketplace {
                    continue;
                }
                let topics: Vec<B256> = log.topics.clone();
                if let Ok(event) = IMechMarketplace::MarketplaceRequest::decode_raw_log(
                    topics.iter().copied(),
                    &log.data,
                ) {
                    request_ids.push(format!("{:#x}", event.requestId));
                }
            }
        }

        tracing::info!(
            target: "proxy",
            event = "dispatch_complete",
            posted = contents.len(),
            ids = request_ids.len(),
        );
        Ok(DispatchResponse { request_ids })
    }

    /// Clamps the requested timeout into `[min, max]` from the marketplace;
    /// defaults to `now + min` when the caller did not pick one.
    async fn clamped_timeout(
        &self,
        marketplace: Address,
        requested: Option<u64>,
    ) -> Result<u64, ProxyError> {
        let min: U256 = self
            .rpc
            .call(marketplace, IMechMarketplace::minResponseTimeoutCall {})
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        let max: U256 = self
            .rpc
            .call(marketplace, IMechMarketplace::maxResponseTimeoutCall {})
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        let min = min.saturating_to::<u64>();
        let max = max.saturating_to::<u64>().max(min);

        let now = unix_now();
        let timeout = requested.unwrap_or(now + min);
        Ok(timeout.clamp(now + min, now + max))
    }
}
