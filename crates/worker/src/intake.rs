// Path: crates/worker/src/intake.rs
//! Request intake: discovery, capability filtering, claim priority, and the
//! at-most-once lease.
//!
//! A request addressed to a foreign mech is surfaced only after its priority
//! window has expired; the marketplace lets any registered mech deliver past
//! that point, and showing it earlier would invite claims this worker cannot
//! deliver on.

use crate::indexer::IndexerClient;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use mech_telemetry::metrics;
use mech_types::error::IntakeError;
use mech_types::{CapabilityProfile, ClaimOutcome, LeaseToken, MarketRequest};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Where unclaimed requests come from (indexer or an on-chain view).
#[async_trait]
pub trait RequestSource: Send + Sync {
    async fn list_unclaimed(&self, mechs: &[Address]) -> Result<Vec<MarketRequest>, IntakeError>;
}

#[async_trait]
impl RequestSource for IndexerClient {
    async fn list_unclaimed(&self, mechs: &[Address]) -> Result<Vec<MarketRequest>, IntakeError> {
        IndexerClient::list_unclaimed(self, mechs).await
    }
}

/// At-most-once claim semantics across the fleet.
#[async_trait]
pub trait LeaseBroker: Send + Sync {
    async fn claim(
        &self,
        request: &MarketRequest,
        worker_id: &str,
    ) -> Result<ClaimOutcome, IntakeError>;

    /// Releases a lease after the request reached a terminal state.
    async fn release(&self, request_id: B256) -> Result<(), IntakeError>;
}

/// In-process broker for single-worker deployments: at-most-once within
/// this process, which is the whole fleet.
#[derive(Default)]
pub struct LocalLeaseBroker {
    held: Mutex<HashSet<B256>>,
}

#[async_trait]
impl LeaseBroker for LocalLeaseBroker {
    async fn claim(
        &self,
        request: &MarketRequest,
        worker_id: &str,
    ) -> Result<ClaimOutcome, IntakeError> {
        let mut held = self.held.lock();
        if !held.insert(request.request_id) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        Ok(ClaimOutcome::Leased(LeaseToken {
            request_id: request.request_id,
            worker_id: worker_id.to_string(),
            token: format!("local-{:#x}", request.request_id),
        }))
    }

    async fn release(&self, request_id: B256) -> Result<(), IntakeError> {
        self.held.lock().remove(&request_id);
        Ok(())
    }
}

/// Control-plane-backed broker for fleets.
pub struct HttpLeaseBroker {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLeaseBroker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IntakeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::Lease(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize)]
struct LeaseResponse {
    token: String,
}

#[async_trait]
impl LeaseBroker for HttpLeaseBroker {
    async fn claim(
        &self,
        request: &MarketRequest,
        worker_id: &str,
    ) -> Result<ClaimOutcome, IntakeError> {
        let response = self
            .http
            .post(format!("{}/leases", self.base_url))
            .json(&serde_json::json!({
                "requestId": request.request_id_hex(),
                "workerId": worker_id,
            }))
            .send()
            .await
            .map_err(|e| IntakeError::Lease(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::CONFLICT => Ok(ClaimOutcome::AlreadyClaimed),
            reqwest::StatusCode::FORBIDDEN => {
                Ok(ClaimOutcome::Rejected("lease forbidden".to_string()))
            }
            status if status.is_success() => {
                let lease: LeaseResponse = response
                    .json()
                    .await
                    .map_err(|e| IntakeError::Lease(e.to_string()))?;
                Ok(ClaimOutcome::Leased(LeaseToken {
                    request_id: request.request_id,
                    worker_id: worker_id.to_string(),
                    token: lease.token,
                }))
            }
            status => Err(IntakeError::Lease(format!("broker returned {status}"))),
        }
    }

    async fn release(&self, request_id: B256) -> Result<(), IntakeError> {
        let response = self
            .http
            .delete(format!("{}/leases/{request_id:#x}", self.base_url))
            .send()
            .await
            .map_err(|e| IntakeError::Lease(e.to_string()))?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(IntakeError::Lease(format!(
                "release returned {}",
                response.status()
            )))
        }
    }
}

/// A successfully claimed request.
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub request: MarketRequest,
    pub lease: LeaseToken,
}

pub struct RequestIntake {
    source: Arc<dyn RequestSource>,
    broker: Arc<dyn LeaseBroker>,
    worker_id: String,
}

impl RequestIntake {
    pub fn new(
        source: Arc<dyn RequestSource>,
        broker: Arc<dyn LeaseBroker>,
        worker_id: &str,
    ) -> Self {
        Self {
            source,
            broker,
            worker_id: worker_id.to_string(),
        }
    }

    pub fn broker(&self) -> Arc<dyn LeaseBroker> {
        self.broker.clone()
    }

    /// Requests this worker may try to claim right now, in claim-priority
    /// order: capability-eligible, priority-window-gated, trusted-operator
    /// requests first.
    pub fn eligible_requests(
        &self,
        discovered: Vec<MarketRequest>,
        active_mech: Address,
        capabilities: &CapabilityProfile,
        now: u64,
    ) -> Vec<MarketRequest> {
        let mut eligible: Vec<MarketRequest> = discovered
            .into_iter()
            .filter(|r| {
                if !capabilities.satisfies(&r.enabled_tools) {
                    return false;
                }
                // Cross-mech gating: foreign requests only past the window.
                r.mech == active_mech || r.priority_window_expired(now)
            })
            .collect();

        // Trusted-operator prioritization: requests whose tools need
        // credentials this worker actually holds come first. Stable sort
        // keeps source order within each class.
        eligible.sort_by_key(|r| {
            if capabilities.holds_credential_for(&r.enabled_tools) {
                0u8
            } else {
                1u8
            }
        });
        eligible
    }

    /// One intake pass: discover, filter, then claim the first request that
    /// is still free. `CLAIM_LOST` races fall through to the next candidate.
    pub async fn poll_and_claim(
        &self,
        active_mech: Address,
        managed_mechs: &[Address],
        capabilities: &CapabilityProfile,
        now: u64,
    ) -> Result<Option<IntakeOutcome>, IntakeError> {
        let discovered = self.source.list_unclaimed(managed_mechs).await?;
        let candidates = self.eligible_requests(discovered, active_mech, capabilities, now);

        for request in candidates {
            match self.broker.claim(&request, &self.worker_id).await? {
                ClaimOutcome::Leased(lease) => {
                    metrics::record_claim("leased");
                    tracing::info!(
                        target: "intake",
                        event = "claimed",
                        request_id = %request.request_id_hex(),
                        mech = %request.mech,
                    );
                    return Ok(Some(IntakeOutcome { request, lease }));
                }
                ClaimOutcome::AlreadyClaimed => {
                    metrics::record_claim("lost");
                    tracing::debug!(
                        target: "intake",
                        event = "claim_lost",
                        request_id = %request.request_id_hex(),
                    );
                }
                ClaimOutcome::Rejected(reason) => {
                    metrics::record_claim("rejected");
                    tracing::warn!(
                        target: "intake",
                        event = "claim_rejected",
                        request_id = %request.request_id_hex(),
                        reason = %reason,
                    );
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mech_types::unix_now;

    fn request(id: u8, mech: Address, timeout: u64, tools: &[&str]) -> MarketRequest {
        MarketRequest {
            request_id: B256::repeat_byte(id),
            mech,
            response_timeout: timeout,
            enabled_tools: tools.iter().map(|s| s.to_string()).collect(),
            blueprint: String::new(),
            job_definition_id: None,
        }
    }

    fn profile(providers: &[&str]) -> CapabilityProfile {
        CapabilityProfile {
            credential_providers: providers.iter().map(|s| s.to_string()).collect(),
            operator_capabilities: Default::default(),
        }
    }

    struct FixedSource(Vec<MarketRequest>);

    #[async_trait]
    impl RequestSource for FixedSource {
        async fn list_unclaimed(
            &self,
            _mechs: &[Address],
        ) -> Result<Vec<MarketRequest>, IntakeError> {
            Ok(self.0.clone())
        }
    }

    fn intake(requests: Vec<MarketRequest>) -> RequestIntake {
        RequestIntake::new(
            Arc::new(FixedSource(requests)),
            Arc::new(LocalLeaseBroker::default()),
            "worker-0",
        )
    }

    #[tokio::test]
    async fn cross_mech_requests_wait_for_the_window() {
        // A foreign-mech request inside its priority window is skipped,
        // and accepted once the window has expired.
        let ours = Address::repeat_byte(0x22);
        let theirs = Address::repeat_byte(0x11);
        let now = unix_now();
        let r = request(3, theirs, now + 120, &[]);

        let it = intake(vec![r.clone()]);
        let caps = profile(&[]);
        assert!(it
            .poll_and_claim(ours, &[ours], &caps, now)
            .await
            .unwrap()
            .is_none());

        let outcome = it
            .poll_and_claim(ours, &[ours], &caps, now + 121)
            .await
            .unwrap()
            .expect("claimable after window");
        assert_eq!(outcome.request.request_id, r.request_id);
    }

    #[tokio::test]
    async fn capability_filter_excludes_unserveable_requests() {
        let ours = Address::repeat_byte(0x22);
        let now = unix_now();
        let needs_openai = request(1, ours, now + 600, &["embed_text"]);

        let it = intake(vec![needs_openai.clone()]);
        assert!(it
            .poll_and_claim(ours, &[ours], &profile(&[]), now)
            .await
            .unwrap()
            .is_none());

        let outcome = it
            .poll_and_claim(ours, &[ours], &profile(&["openai"]), now)
            .await
            .unwrap()
            .expect("eligible with openai grant");
        assert_eq!(outcome.request.request_id, needs_openai.request_id);
    }

    #[tokio::test]
    async fn trusted_operator_requests_claim_first() {
        let ours = Address::repeat_byte(0x22);
        let now = unix_now();
        let plain = request(1, ours, now + 600, &[]);
        let credentialed = request(2, ours, now + 600, &["embed_text"]);

        let it = intake(vec![plain, credentialed.clone()]);
        let outcome = it
            .poll_and_claim(ours, &[ours], &profile(&["openai"]), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.request.request_id, credentialed.request_id);
    }

    #[tokio::test]
    async fn claim_lost_falls_through_to_next_candidate() {
        let ours = Address::repeat_byte(0x22);
        let now = unix_now();
        let first = request(1, ours, now + 600, &[]);
        let second = request(2, ours, now + 600, &[]);

        let broker = Arc::new(LocalLeaseBroker::default());
        // Another worker already holds the first lease.
        let outcome = broker
            .claim(&first, "rival")
            .await
            .unwrap();
        assert!(matches!(outcome, ClaimOutcome::Leased(_)));

        let it = RequestIntake::new(
            Arc::new(FixedSource(vec![first, second.clone()])),
            broker,
            "worker-0",
        );
        let outcome = it
            .poll_and_claim(ours, &[ours], &profile(&[]), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.request.request_id, second.request_id);
    }

    #[tokio::test]
    async fn local_broker_is_at_most_once_until_release() {
        let ours = Address::repeat_byte(0x22);
        let now = unix_now();
        let r = request(1, ours, now + 600, &[]);
        let broker = LocalLeaseBroker::default();

        assert!(matches!(
            broker.claim(&r, "a").await.unwrap(),
            ClaimOutcome::Leased(_)
        ));
        assert!(matches!(
            broker.claim(&r, "b").await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        ));
        broker.release(r.request_id).await.unwrap();
        assert!(matches!(
            broker.claim(&r, "b").await.unwrap(),
            ClaimOutcome::Leased(_)
        ));
    }
}
