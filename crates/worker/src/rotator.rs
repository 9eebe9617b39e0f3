// Path: crates/worker/src/rotator.rs
//! Picks which staked service the worker serves.
//!
//! Between poll cycles the rotator re-evaluates staking eligibility and
//! moves the worker onto the service that still needs the most requests
//! this epoch. It never switches while a delivery is in progress; the
//! worker loop drains the in-flight claim before calling in.

use crate::monitor::ActivityCheck;
use crate::registry::ServiceRegistry;
use mech_telemetry::metrics;
use mech_types::{unix_now, ActivityStatus, Service};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RotationDecision {
    pub selected: Option<Service>,
    pub reason: String,
    pub switched: bool,
}

#[derive(Default)]
struct RotatorState {
    current: Option<String>,
    last_eval: Option<Instant>,
    last_decision: Option<RotationDecision>,
    rotations: u64,
}

pub struct ServiceRotator {
    registry: Arc<ServiceRegistry>,
    checker: Arc<dyn ActivityCheck>,
    poll_interval: Duration,
    state: Mutex<RotatorState>,
}

impl ServiceRotator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        checker: Arc<dyn ActivityCheck>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            checker,
            poll_interval,
            state: Mutex::new(RotatorState::default()),
        }
    }

    /// First selection at startup; always evaluates.
    pub async fn initialize(&self) -> RotationDecision {
        self.evaluate(true).await
    }

    /// Rate-limited re-evaluation: within `poll_interval` of the last one,
    /// the cached decision is returned unchanged (marked unswitched).
    pub async fn reevaluate(&self) -> RotationDecision {
        self.evaluate(false).await
    }

    pub fn rotation_count(&self) -> u64 {
        self.state.lock().rotations
    }

    async fn evaluate(&self, force: bool) -> RotationDecision {
        {
            let state = self.state.lock();
            if !force {
                if let (Some(last), Some(decision)) = (state.last_eval, &state.last_decision) {
                    if last.elapsed() < self.poll_interval {
                        let mut cached = decision.clone();
                        cached.switched = false;
                        return cached;
                    }
                }
            }
        }

        let staked: Vec<Service> = self.registry.staked().into_iter().cloned().collect();
        let (selected, reason) = if staked.is_empty() {
            (
                self.registry.services().first().cloned(),
                "no staked services".to_string(),
            )
        } else {
            self.select_among_staked(&staked).await
        };

        self.finalize(selected, reason)
    }

    async fn select_among_staked(&self, staked: &[Service]) -> (Option<Service>, String) {
        let statuses = self.checker.check(staked).await;
        let now = unix_now();

        for status in statuses.iter().filter(|s| s.error.is_some()) {
            tracing::warn!(
                target: "rotator",
                event = "status_errored",
                service = %status.service_config_id,
                error = status.error.as_deref().unwrap_or(""),
            );
        }

        let usable: Vec<&ActivityStatus> =
            statuses.iter().filter(|s| s.error.is_none()).collect();
        if usable.is_empty() {
            let current = self.state.lock().current.clone();
            let kept = current
                .as_deref()
                .and_then(|id| self.registry.get(id).cloned())
                .or_else(|| staked.first().cloned());
            return (kept, "all staked services errored".to_string());
        }

        let mut needy: Vec<(&ActivityStatus, u64)> = usable
            .iter()
            .filter(|s| !s.is_eligible_for_rewards(now))
            .map(|s| (*s, s.requests_needed(now)))
            .collect();

        if !needy.is_empty() {
            // Most-starved first; stable by config id on ties.
            needy.sort_by(|a, b| {
                b.1.cmp(&a.1)
                    .then_with(|| a.0.service_config_id.cmp(&b.0.service_config_id))
            });
            let (status, needed) = needy[0];
            let selected = self.registry.get(&status.service_config_id).cloned();
            let reason = match &selected {
                Some(s) => format!("service #{} needs {} more requests", s.service_id, needed),
                None => "selected service vanished from registry".to_string(),
            };
            return (selected, reason);
        }

        // Everyone is eligible: stay put.
        let current = self.state.lock().current.clone();
        let kept = current
            .as_deref()
            .and_then(|id| self.registry.get(id).cloned())
            .or_else(|| staked.first().cloned());
        (kept, "all services eligible for epoch".to_string())
    }

    fn finalize(&self, selected: Option<Service>, reason: String) -> RotationDecision {
        let mut state = self.state.lock();
        let selected_id = selected.as_ref().map(|s| s.service_config_id.clone());
        let switched = selected_id.is_some() && selected_id != state.current;
        if switched {
            state.rotations += 1;
            metrics::record_rotation();
            tracing::info!(
                target: "rotator",
                event = "rotated",
                from = state.current.as_deref().unwrap_or("none"),
                to = selected_id.as_deref().unwrap_or("none"),
                reason = %reason,
            );
            state.current = selected_id;
        } else {
            tracing::debug!(target: "rotator", event = "kept", reason = %reason);
        }
        state.last_eval = Some(Instant::now());
        let decision = RotationDecision {
            selected,
            reason,
            switched,
        };
        state.last_decision = Some(decision.clone());
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use async_trait::async_trait;
    use parking_lot::Mutex as PMutex;
    use std::collections::HashMap;
    use std::io::Write;

    // ratio with ceil(86400 * ratio / 1e18) == 2
    const TWO_PER_EPOCH: u64 = 23_148_148_148_148;

    struct ScriptedCheck {
        // config id -> current_request_count
        counts: PMutex<HashMap<String, u64>>,
    }

    #[async_trait]
    impl ActivityCheck for ScriptedCheck {
        async fn check(&self, services: &[Service]) -> Vec<ActivityStatus> {
            let counts = self.counts.lock();
            services
                .iter()
                .map(|s| ActivityStatus {
                    service_config_id: s.service_config_id.clone(),
                    staking_contract: s.staking_contract.unwrap_or(Address::ZERO),
                    liveness_period: 86_400,
                    ts_checkpoint: unix_now(),
                    liveness_ratio: U256::from(TWO_PER_EPOCH),
                    current_request_count: *counts.get(&s.service_config_id).unwrap_or(&0),
                    baseline_request_count: 0,
                    error: None,
                })
                .collect()
        }
    }

    fn write_profile(dir: &std::path::Path, name: &str, service_id: u64, staked: bool) {
        let staking = if staked {
            serde_json::json!("0x2ef503950be67a98746f484da0bbada339df3326")
        } else {
            serde_json::Value::Null
        };
        let value = serde_json::json!({
            "service_id": service_id,
            "mech_address": "0x77af31de935740567cf4ff1986d04b2c964a786a",
            "safe_address": "0x5e1d1eb61e1164d5a50b28c575da73a29995dff8",
            "agent_address": "0x8c6d0b3e5f6b3c0f8ddc2b0f2a1c9d3e4f5a6b7c",
            "agent_key_file": "agent.hex",
            "chain_id": 100,
            "staking_contract": staking
        });
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(value.to_string().as_bytes()).unwrap();
    }

    fn rotator_with(
        dir: &tempfile::TempDir,
        counts: &[(&str, u64)],
        poll_interval: Duration,
    ) -> (ServiceRotator, Arc<ScriptedCheck>) {
        let registry = Arc::new(ServiceRegistry::load(dir.path()).unwrap());
        let check = Arc::new(ScriptedCheck {
            counts: PMutex::new(
                counts
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            ),
        });
        (
            ServiceRotator::new(registry, check.clone(), poll_interval),
            check,
        )
    }

    // Required per epoch is ceil(2-ish) + safety margin = 3 with this ratio.
    // counts below are "requests already served this epoch".

    #[tokio::test]
    async fn picks_most_starved_service_then_moves_on() {
        // A needs 3, B needs 1; the rotator must pick A, then after A is
        // eligible pick B.
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "a.json", 1, true);
        write_profile(dir.path(), "b.json", 2, true);
        let (rotator, check) =
            rotator_with(&dir, &[("a", 0), ("b", 2)], Duration::from_millis(0));

        let decision = rotator.initialize().await;
        assert_eq!(
            decision.selected.as_ref().unwrap().service_config_id,
            "a"
        );
        assert!(decision.reason.contains("needs 3 more"));
        assert!(decision.switched);

        // A serves three requests and becomes eligible; B still needs one.
        check.counts.lock().insert("a".into(), 3);
        let decision = rotator.reevaluate().await;
        assert_eq!(
            decision.selected.as_ref().unwrap().service_config_id,
            "b"
        );
        assert!(decision.reason.contains("needs 1 more"));
        assert_eq!(rotator.rotation_count(), 2);
    }

    #[tokio::test]
    async fn all_eligible_stays_on_current() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "a.json", 1, true);
        write_profile(dir.path(), "b.json", 2, true);
        let (rotator, _check) =
            rotator_with(&dir, &[("a", 5), ("b", 5)], Duration::from_millis(0));

        let first = rotator.initialize().await;
        assert_eq!(first.reason, "all services eligible for epoch");
        let picked = first.selected.unwrap().service_config_id;

        let second = rotator.reevaluate().await;
        assert_eq!(second.selected.unwrap().service_config_id, picked);
        assert!(!second.switched);
        assert_eq!(rotator.rotation_count(), 1);
    }

    #[tokio::test]
    async fn no_staked_services_picks_first_valid() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "a.json", 1, false);
        write_profile(dir.path(), "b.json", 2, false);
        let (rotator, _check) = rotator_with(&dir, &[], Duration::from_millis(0));

        let decision = rotator.initialize().await;
        assert_eq!(decision.reason, "no staked services");
        assert_eq!(decision.selected.unwrap().service_config_id, "a");
    }

    #[tokio::test]
    async fn ties_break_stably_by_config_id() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "b.json", 2, true);
        write_profile(dir.path(), "a.json", 1, true);
        let (rotator, _check) =
            rotator_with(&dir, &[("a", 0), ("b", 0)], Duration::from_millis(0));

        let decision = rotator.initialize().await;
        assert_eq!(decision.selected.unwrap().service_config_id, "a");
    }

    #[tokio::test]
    async fn reevaluate_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "a.json", 1, true);
        write_profile(dir.path(), "b.json", 2, true);
        let (rotator, check) =
            rotator_with(&dir, &[("a", 0), ("b", 2)], Duration::from_secs(3600));

        let first = rotator.initialize().await;
        assert_eq!(first.selected.as_ref().unwrap().service_config_id, "a");

        // Even though the world changed, the cached decision holds inside
        // the poll interval.
        check.counts.lock().insert("a".into(), 3);
        let second = rotator.reevaluate().await;
        assert_eq!(second.selected.unwrap().service_config_id, "a");
        assert!(!second.switched);
    }
}
