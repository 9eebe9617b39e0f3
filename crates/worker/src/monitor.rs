// Path: crates/worker/src/monitor.rs
//! Gas-free eligibility math against staking and activity contracts.
//!
//! Three caches, keyed by staking-contract address:
//! - contract cache (permanent): `livenessPeriod`, `activityChecker`,
//!   `livenessRatio`, `rewardsPerSecond`, immutable per deployment;
//! - checkpoint cache (TTL): `tsCheckpoint`, which moves once per epoch;
//! - dashboard cache (permanent): extended immutable reads for the status
//!   projection.
//!
//! Per-service counters are fetched fresh every cycle. Concurrent misses on
//! the same key coalesce behind a per-key guard so N services sharing one
//! staking contract cost one fetch.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use mech_chain::contracts::{IActivityChecker, IStaking};
use mech_chain::RpcClient;
use mech_types::error::RpcError;
use mech_types::{unix_now, ActivityStatus, Service};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct ContractInfo {
    liveness_period: u64,
    activity_checker: Address,
    liveness_ratio: U256,
    rewards_per_second: U256,
}

#[derive(Debug, Clone)]
struct DashboardInfo {
    min_staking_deposit: U256,
    max_num_services: u64,
    max_inactivity_periods: u64,
}

#[derive(Debug, Clone, Copy)]
struct CheckpointEntry {
    ts_checkpoint: u64,
    fetched_at: u64,
}

/// Seam for the rotator; the real monitor talks to the chain, tests supply
/// canned statuses.
#[async_trait]
pub trait ActivityCheck: Send + Sync {
    async fn check(&self, services: &[Service]) -> Vec<ActivityStatus>;
}

pub struct ActivityMonitor {
    rpc: Arc<RpcClient>,
    checkpoint_ttl: Duration,
    contract_cache: RwLock<HashMap<Address, ContractInfo>>,
    checkpoint_cache: RwLock<HashMap<Address, CheckpointEntry>>,
    dashboard_cache: RwLock<HashMap<Address, DashboardInfo>>,
    inflight: tokio::sync::Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActivityMonitor {
    pub fn new(rpc: Arc<RpcClient>, checkpoint_ttl: Duration) -> Self {
        Self {
            rpc,
            checkpoint_ttl,
            contract_cache: RwLock::new(HashMap::new()),
            checkpoint_cache: RwLock::new(HashMap::new()),
            dashboard_cache: RwLock::new(HashMap::new()),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Per-key guard for coalescing concurrent cache misses.
    async fn key_guard(&self, key: Address) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inflight.lock().await;
        map.entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn contract_info(&self, staking: Address) -> Result<ContractInfo, RpcError> {
        if let Some(info) = self.contract_cache.read().get(&staking) {
            return Ok(info.clone());
        }
        let guard = self.key_guard(staking).await;
        let _fetch = guard.lock().await;
        if let Some(info) = self.contract_cache.read().get(&staking) {
            return Ok(info.clone());
        }

        let liveness_period: U256 = self
            .rpc
            .call(staking, IStaking::livenessPeriodCall {})
            .await?;
        let activity_checker: Address = self
            .rpc
            .call(staking, IStaking::activityCheckerCall {})
            .await?;
        let liveness_ratio: U256 = self
            .rpc
            .call(activity_checker, IActivityChecker::livenessRatioCall {})
            .await?;
        let rewards_per_second: U256 = self
            .rpc
            .call(staking, IStaking::rewardsPerSecondCall {})
            .await?;

        let info = ContractInfo {
            liveness_period: liveness_period.saturating_to::<u64>(),
            activity_checker,
            liveness_ratio,
            rewards_per_second,
        };
        self.contract_cache.write().insert(staking, info.clone());
        tracing::debug!(
            target: "monitor",
            event = "contract_cached",
            staking = %staking,
            liveness_period = info.liveness_period,
        );
        Ok(info)
    }

    async fn checkpoint(&self, staking: Address) -> Result<u64, RpcError> {
        let now = unix_now();
        if let Some(entry) = self.checkpoint_cache.read().get(&staking) {
            if now.saturating_sub(entry.fetched_at) < self.checkpoint_ttl.as_secs() {
                return Ok(entry.ts_checkpoint);
            }
        }
        let guard = self.key_guard(staking).await;
        let _fetch = guard.lock().await;
        if let Some(entry) = self.checkpoint_cache.read().get(&staking) {
            if now.saturating_sub(entry.fetched_at) < self.checkpoint_ttl.as_secs() {
                return Ok(entry.ts_checkpoint);
            }
        }

        let ts: U256 = self.rpc.call(staking, IStaking::tsCheckpointCall {}).await?;
        let ts_checkpoint = ts.saturating_to::<u64>();
        self.checkpoint_cache.write().insert(
            staking,
            CheckpointEntry {
                ts_checkpoint,
                fetched_at: now,
            },
        );
        Ok(ts_checkpoint)
    }

    /// Extended immutable reads used by the status projection; cached
    /// forever like the contract cache.
    pub async fn dashboard(&self, staking: Address) -> Result<Value, RpcError> {
        if let Some(info) = self.dashboard_cache.read().get(&staking) {
            return Ok(dashboard_json(staking, info));
        }
        let guard = self.key_guard(staking).await;
        let _fetch = guard.lock().await;
        if let Some(info) = self.dashboard_cache.read().get(&staking) {
            return Ok(dashboard_json(staking, info));
        }

        let min_staking_deposit: U256 = self
            .rpc
            .call(staking, IStaking::minStakingDepositCall {})
            .await?;
        let max_num_services: U256 = self
            .rpc
            .call(staking, IStaking::maxNumServicesCall {})
            .await?;
        let max_inactivity: U256 = self
            .rpc
            .call(staking, IStaking::maxNumInactivityPeriodsCall {})
            .await?;

        let info = DashboardInfo {
            min_staking_deposit,
            max_num_services: max_num_services.saturating_to::<u64>(),
            max_inactivity_periods: max_inactivity.saturating_to::<u64>(),
        };
        self.dashboard_cache.write().insert(staking, info.clone());
        Ok(dashboard_json(staking, &info))
    }

    async fn status_for(&self, service: &Service, staking: Address) -> ActivityStatus {
        let result: Result<ActivityStatus, RpcError> = async {
            let info = self.contract_info(staking).await?;
            let ts_checkpoint = self.checkpoint(staking).await?;

            // Fresh per-cycle reads: the service's checkpoint baseline and
            // the multisig's live counters.
            let service_info: IStaking::ServiceInfo = self
                .rpc
                .call(
                    staking,
                    IStaking::getServiceInfoCall {
                        serviceId: U256::from(service.service_id),
                    },
                )
                .await?;
            let baseline = service_info
                .nonces
                .get(1)
                .copied()
                .unwrap_or(U256::ZERO)
                .saturating_to::<u64>();

            let multisig_nonces: Vec<U256> = self
                .rpc
                .call(
                    info.activity_checker,
                    IActivityChecker::getMultisigNoncesCall {
                        multisig: service.safe_address,
                    },
                )
                .await?;
            let current = multisig_nonces
                .get(1)
                .copied()
                .unwrap_or(U256::ZERO)
                .saturating_to::<u64>();

            Ok(ActivityStatus {
                service_config_id: service.service_config_id.clone(),
                staking_contract: staking,
                liveness_period: info.liveness_period,
                ts_checkpoint,
                liveness_ratio: info.liveness_ratio,
                current_request_count: current,
                baseline_request_count: baseline,
                error: None,
            })
        }
        .await;

        match result {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    target: "monitor",
                    event = "status_error",
                    service = %service.service_config_id,
                    error = %e,
                );
                ActivityStatus::errored(&service.service_config_id, staking, e.to_string())
            }
        }
    }

    /// Drops all cached checkpoints; used by tests and manual refresh.
    pub fn invalidate_checkpoints(&self) {
        self.checkpoint_cache.write().clear();
    }
}

fn dashboard_json(staking: Address, info: &DashboardInfo) -> Value {
    json!({
        "staking_contract": format!("{staking:#x}"),
        "min_staking_deposit": info.min_staking_deposit.to_string(),
        "max_num_services": info.max_num_services,
        "max_inactivity_periods": info.max_inactivity_periods,
    })
}

#[async_trait]
impl ActivityCheck for ActivityMonitor {
    /// Statuses for every staked service, fetched concurrently. Services
    /// without a staking contract are skipped (rotation treats them as
    /// always active). Read failures yield an errored status, never a
    /// panic or a dropped service.
    async fn check(&self, services: &[Service]) -> Vec<ActivityStatus> {
        let futures = services
            .iter()
            .filter_map(|s| s.staking_contract.map(|staking| (s, staking)))
            .map(|(s, staking)| self.status_for(s, staking));
        futures::future::join_all(futures).await
    }
}
