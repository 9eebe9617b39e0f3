// Path: crates/worker/src/delivery.rs
//! The delivery engine.
//!
//! Per request: `Idle → Prepared → Preflighted → Submitted → Verified →
//! Done`, with failures branching to a coded error or `Revoked`. Every
//! transition is a structured log event. The pending-delivery entry
//! recorded at submission is cleared on every exit path past that point.

use crate::active::ActiveService;
use crate::indexer::IndexerClient;
use crate::tracker::TransactionTracker;
use alloy_primitives::{Address, B256};
use alloy_sol_types::SolCall;
use mech_chain::contracts::IAgentMech;
use mech_chain::{backoff, classify_submission_error, receipt_has_revoke, RpcClient, SubmissionClass};
use mech_ipfs::{IpfsStore, StoredContent};
use mech_telemetry::metrics;
use mech_types::error::{DeliveryError, ErrorCode, RpcError, SafeError};
use mech_types::{unix_now, DeliveryOutcome, DeliveryPayload, MarketRequest};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Tier A attempts against `getUndeliveredRequestIds`.
    pub verify_attempts: u32,
    /// Tier A backoff base.
    pub verify_base_delay: Duration,
    /// Tier A jitter window in milliseconds.
    pub verify_jitter_ms: u64,
    /// Tier B attempts against the indexer.
    pub indexer_attempts: u32,
    /// Undelivered-list page size.
    pub page_size: u64,
    /// Paging stops past this offset.
    pub max_offset: u64,
    /// Submission attempts for nonce-class errors.
    pub submit_attempts: u32,
    /// Outer deadline for receipt confirmation.
    pub receipt_deadline: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            verify_attempts: 5,
            verify_base_delay: Duration::from_secs(1),
            verify_jitter_ms: 500,
            indexer_attempts: 3,
            page_size: 100,
            max_offset: 20_000,
            submit_attempts: 5,
            receipt_deadline: Duration::from_secs(240),
        }
    }
}

pub struct DeliveryEngine {
    rpc: Arc<RpcClient>,
    ipfs: Arc<IpfsStore>,
    indexer: Option<Arc<IndexerClient>>,
    tracker: Arc<TransactionTracker>,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    pub fn new(
        rpc: Arc<RpcClient>,
        ipfs: Arc<IpfsStore>,
        indexer: Option<Arc<IndexerClient>>,
        tracker: Arc<TransactionTracker>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            rpc,
            ipfs,
            indexer,
            tracker,
            config,
        }
    }

    /// Runs the full state machine for one request.
    pub async fn deliver(
        &self,
        active: &ActiveService,
        request: &MarketRequest,
        payload: &DeliveryPayload,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let request_id = request.request_id;

        // --- Prepare ---
        let stored = self.prepare(request, payload).await?;
        tracing::info!(
            target: "delivery",
            event = "prepared",
            request_id = %request.request_id_hex(),
            cid = %stored.cid,
        );

        // --- Preflight ---
        if let Some(outcome) = self.preflight(request).await? {
            // Terminal without a submission: already delivered, or a prior
            // submission of ours resolved.
            metrics::record_delivery("already_delivered");
            return Ok(outcome);
        }

        // --- Cross-mech routing ---
        let target_mech = self.resolve_target_mech(active, request, unix_now())?;

        if !active
            .router
            .is_deployed()
            .await
            .map_err(DeliveryError::Rpc)?
        {
            return Err(DeliveryError::SafeNotDeployed(
                active.router.safe_address(),
            ));
        }

        // --- Submit + Verify, with the pending entry cleared on all exits
        let result = self
            .submit_and_verify(active, request, target_mech, &stored)
            .await;
        self.tracker.clear(request_id);
        match &result {
            Ok(DeliveryOutcome::Done { .. }) => metrics::record_delivery("done"),
            Ok(DeliveryOutcome::Revoked) => metrics::record_delivery("revoked"),
            Err(e) => metrics::record_delivery(e.code()),
        }
        result
    }

    /// Uploads the payload: local node first, public gateway as the
    /// transitional fallback. A local failure alone is non-fatal.
    async fn prepare(
        &self,
        request: &MarketRequest,
        payload: &DeliveryPayload,
    ) -> Result<StoredContent, DeliveryError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| DeliveryError::Validation(format!("payload not serializable: {e}")))?;

        let local = self.ipfs.put_json(&value).await;
        let gateway = match &local {
            Ok(_) => {
                // Best-effort wider distribution; the local digest stands.
                if let Err(e) = self.ipfs.publish_via_gateway(&value).await {
                    tracing::debug!(
                        target: "delivery",
                        event = "gateway_publish_skipped",
                        request_id = %request.request_id_hex(),
                        error = %e,
                    );
                }
                None
            }
            Err(local_err) => {
                tracing::warn!(
                    target: "delivery",
                    event = "local_ipfs_failed",
                    request_id = %request.request_id_hex(),
                    error = %local_err,
                );
                Some(self.ipfs.publish_via_gateway(&value).await)
            }
        };

        match (local, gateway) {
            (Ok(stored), _) => Ok(stored),
            (Err(_), Some(Ok(stored))) => Ok(stored),
            (Err(local_err), Some(Err(gateway_err))) => Err(DeliveryError::Upload(format!(
                "local: {local_err}; gateway: {gateway_err}"
            ))),
            (Err(local_err), None) => Err(DeliveryError::Upload(local_err.to_string())),
        }
    }

    /// Stale-sweeps the tracker, resolves any pending entry for this
    /// request, and verifies undelivered state. `Some(outcome)` ends the
    /// delivery without submitting.
    async fn preflight(
        &self,
        request: &MarketRequest,
    ) -> Result<Option<DeliveryOutcome>, DeliveryError> {
        let now = unix_now();
        let swept = self.tracker.sweep_stale(now);
        if swept > 0 {
            tracing::debug!(target: "delivery", event = "stale_swept", count = swept);
        }

        if let Some(pending) = self.tracker.get(request.request_id) {
            match self
                .rpc
                .transaction_receipt(pending.tx_hash)
                .await
                .map_err(DeliveryError::Rpc)?
            {
                Some(receipt) => {
                    self.tracker.clear(request.request_id);
                    if receipt.succeeded() {
                        tracing::info!(
                            target: "delivery",
                            event = "pending_resolved",
                            request_id = %request.request_id_hex(),
                            tx_hash = %pending.tx_hash,
                        );
                        return Ok(Some(DeliveryOutcome::Done {
                            tx_hash: Some(pending.tx_hash),
                        }));
                    }
                    // Prior attempt reverted; fall through to a fresh one.
                }
                None => return Err(DeliveryError::PendingInFlight(request.request_id)),
            }
        }

        if self.verify_undelivered(request).await? {
            Ok(None)
        } else {
            tracing::info!(
                target: "delivery",
                event = "already_delivered",
                request_id = %request.request_id_hex(),
            );
            Ok(Some(DeliveryOutcome::Done { tx_hash: None }))
        }
    }

    /// Two-tier undelivered check. `true` means still undelivered.
    /// Verification always targets the request's own mech; that is the
    /// list the request lives in, whoever ends up delivering it.
    async fn verify_undelivered(&self, request: &MarketRequest) -> Result<bool, DeliveryError> {
        let seed = u64::from_be_bytes(
            request.request_id[..8]
                .try_into()
                .unwrap_or([0u8; 8]),
        );

        // Tier A: RPC paging. Any completed call ends the tier.
        let mut last_error: Option<RpcError> = None;
        for attempt in 0..self.config.verify_attempts {
            if attempt > 0 {
                metrics::record_rpc_retry("verify");
                tokio::time::sleep(backoff::delay(
                    attempt - 1,
                    self.config.verify_base_delay,
                    self.config.verify_jitter_ms,
                    Duration::from_secs(60),
                    seed.wrapping_add(attempt as u64),
                ))
                .await;
            }
            match self.scan_undelivered_pages(request).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    tracing::warn!(
                        target: "delivery",
                        event = "verify_rpc_failed",
                        attempt,
                        error = %e,
                    );
                    last_error = Some(e);
                }
            }
        }

        // Tier B: indexer fallback.
        if let Some(indexer) = &self.indexer {
            for attempt in 0..self.config.indexer_attempts {
                match indexer.is_delivered(request.request_id).await {
                    Ok(delivered) => return Ok(!delivered),
                    Err(e) => {
                        tracing::warn!(
                            target: "delivery",
                            event = "verify_indexer_failed",
                            attempt,
                            error = %e,
                        );
                    }
                }
            }
        }

        Err(DeliveryError::VerifyFailed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "both verification tiers failed".to_string()),
        ))
    }

    /// Pages `getUndeliveredRequestIds` on the request's mech until the
    /// batch comes back short or the offset cap is reached.
    async fn scan_undelivered_pages(&self, request: &MarketRequest) -> Result<bool, RpcError> {
        let mut offset = 0u64;
        loop {
            let batch: Vec<B256> = self
                .rpc
                .call(
                    request.mech,
                    IAgentMech::getUndeliveredRequestIdsCall {
                        size: alloy_primitives::U256::from(self.config.page_size),
                        offset: alloy_primitives::U256::from(offset),
                    },
                )
                .await?
                .into_iter()
                .collect();

            if batch.iter().any(|id| *id == request.request_id) {
                return Ok(true);
            }
            if (batch.len() as u64) < self.config.page_size {
                return Ok(false);
            }
            offset += self.config.page_size;
            if offset > self.config.max_offset {
                return Ok(false);
            }
        }
    }

    /// A foreign-mech request is deliverable by us only after its priority
    /// window; then the delivery targets our own mech, whose `onlyOperator`
    /// check our Safe passes.
    pub fn resolve_target_mech(
        &self,
        active: &ActiveService,
        request: &MarketRequest,
        now: u64,
    ) -> Result<Address, DeliveryError> {
        let ours = active.service.mech_address;
        if request.mech == ours {
            return Ok(ours);
        }
        if !request.priority_window_expired(now) {
            return Err(DeliveryError::CrossMechPriorityActive {
                response_timeout: request.response_timeout,
            });
        }
        Ok(ours)
    }

    async fn submit_and_verify(
        &self,
        active: &ActiveService,
        request: &MarketRequest,
        target_mech: Address,
        stored: &StoredContent,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let calldata = IAgentMech::deliverToMarketplaceCall {
            requestId: request.request_id,
            deliveryDigest: stored.digest,
        }
        .abi_encode();

        let mut tx_hash: Option<B256> = None;
        for attempt in 0..self.config.submit_attempts {
            if attempt > 0 {
                // Nonce-class retry: long ladder, and the undelivered state
                // must be re-verified first.
                tokio::time::sleep(backoff::nonce_ladder(attempt - 1)).await;
                if !self.verify_undelivered(request).await? {
                    tracing::info!(
                        target: "delivery",
                        event = "delivered_during_retry",
                        request_id = %request.request_id_hex(),
                    );
                    return Ok(DeliveryOutcome::Done { tx_hash: None });
                }
            }

            match active
                .router
                .exec_transaction(target_mech, calldata.clone())
                .await
            {
                Ok(hash) => {
                    self.tracker.record(request.request_id, hash, unix_now());
                    tracing::info!(
                        target: "delivery",
                        event = "submitted",
                        request_id = %request.request_id_hex(),
                        tx_hash = %hash,
                        target_mech = %target_mech,
                        attempt,
                    );
                    tx_hash = Some(hash);
                    break;
                }
                Err(e) => match self.classify(&e) {
                    SubmissionClass::NonceConflict if attempt + 1 < self.config.submit_attempts => {
                        metrics::record_rpc_retry("submit");
                        tracing::warn!(
                            target: "delivery",
                            event = "nonce_conflict",
                            request_id = %request.request_id_hex(),
                            attempt,
                            error = %e,
                        );
                    }
                    SubmissionClass::NotFound => {
                        // The node lost the transaction. If the request got
                        // delivered meanwhile, the goal is met.
                        if !self.verify_undelivered(request).await? {
                            return Ok(DeliveryOutcome::Done { tx_hash: None });
                        }
                        return Err(DeliveryError::Submission(e.to_string()));
                    }
                    SubmissionClass::InnerRevert => {
                        tracing::error!(
                            target: "delivery",
                            event = "inner_revert",
                            request_id = %request.request_id_hex(),
                            target_mech = %target_mech,
                            safe = %active.router.safe_address(),
                            "GS013: the Safe is likely not the operator of the target mech"
                        );
                        return Err(DeliveryError::InnerRevert(e.to_string()));
                    }
                    _ => return Err(DeliveryError::Submission(e.to_string())),
                },
            }
        }

        let tx_hash = tx_hash.ok_or_else(|| {
            DeliveryError::Submission("nonce retries exhausted".to_string())
        })?;

        // --- Verify ---
        let receipt = active
            .router
            .await_receipt(tx_hash, self.config.receipt_deadline)
            .await
            .map_err(|e| DeliveryError::Receipt(e.to_string()))?;

        if !receipt.succeeded() {
            return Err(DeliveryError::Receipt(format!(
                "transaction {tx_hash:#x} reverted"
            )));
        }
        if receipt_has_revoke(&receipt, target_mech, request.request_id) {
            tracing::warn!(
                target: "delivery",
                event = "revoked",
                request_id = %request.request_id_hex(),
                tx_hash = %tx_hash,
            );
            return Ok(DeliveryOutcome::Revoked);
        }

        tracing::info!(
            target: "delivery",
            event = "verified",
            request_id = %request.request_id_hex(),
            tx_hash = %tx_hash,
        );
        Ok(DeliveryOutcome::Done {
            tx_hash: Some(tx_hash),
        })
    }

    fn classify(&self, error: &SafeError) -> SubmissionClass {
        match error {
            SafeError::Rpc(e) => classify_submission_error(&e.to_string()),
            SafeError::Sign(_) => SubmissionClass::Other,
        }
    }
}
