// Path: crates/types/src/activity.rs
//! Staking eligibility math captured from chain once per poll cycle.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Extra requests demanded on top of the checkpoint formula, so a service
/// that lands exactly on the ratio boundary is not starved by rounding on
/// the contract side.
pub const SAFETY_MARGIN: u64 = 1;

const RATIO_SCALE: u64 = 1_000_000_000_000_000_000;

/// Per-service, per-poll snapshot of the staking/activity contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStatus {
    pub service_config_id: String,
    pub staking_contract: Address,
    /// `livenessPeriod()` in seconds. Immutable per deployment.
    pub liveness_period: u64,
    /// `tsCheckpoint()` epoch seconds; moves once per epoch.
    pub ts_checkpoint: u64,
    /// `livenessRatio()` fixed-point 1e18 requests-per-second.
    pub liveness_ratio: U256,
    /// Multisig request counter right now (`getMultisigNonces()[1]`).
    pub current_request_count: u64,
    /// Counter recorded at the last checkpoint (`nonces[1]` of the service).
    pub baseline_request_count: u64,
    /// Set when any of the chain reads failed; an errored status is never
    /// eligible and rotation skips it.
    #[serde(default)]
    pub error: Option<String>,
}

impl ActivityStatus {
    /// `max(livenessPeriod, now - tsCheckpoint)`.
    pub fn effective_period(&self, now: u64) -> u64 {
        self.liveness_period
            .max(now.saturating_sub(self.ts_checkpoint))
    }

    /// `ceil(effectivePeriod * livenessRatio / 1e18) + SAFETY_MARGIN`.
    pub fn required_requests(&self, now: u64) -> u64 {
        let num = U256::from(self.effective_period(now)) * self.liveness_ratio;
        let denom = U256::from(RATIO_SCALE);
        let mut required = num / denom;
        if num % denom != U256::ZERO {
            required += U256::from(1);
        }
        required.saturating_to::<u64>().saturating_add(SAFETY_MARGIN)
    }

    /// Requests the multisig has produced since the checkpoint.
    pub fn eligible_requests(&self) -> u64 {
        self.current_request_count
            .saturating_sub(self.baseline_request_count)
    }

    /// Whether the service has already earned this epoch's rewards.
    /// An errored snapshot is never eligible.
    pub fn is_eligible_for_rewards(&self, now: u64) -> bool {
        self.error.is_none() && self.eligible_requests() >= self.required_requests(now)
    }

    /// How many more requests this service must serve this epoch.
    pub fn requests_needed(&self, now: u64) -> u64 {
        self.required_requests(now)
            .saturating_sub(self.eligible_requests())
    }

    /// Error snapshot for a service whose chain reads failed.
    pub fn errored(config_id: &str, staking_contract: Address, message: String) -> Self {
        Self {
            service_config_id: config_id.to_string(),
            staking_contract,
            liveness_period: 0,
            ts_checkpoint: 0,
            liveness_ratio: U256::ZERO,
            current_request_count: 0,
            baseline_request_count: 0,
            error: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(ratio: u64, checkpoint_age: u64, baseline: u64, current: u64) -> ActivityStatus {
        let now = 1_700_000_000u64;
        ActivityStatus {
            service_config_id: "svc".into(),
            staking_contract: Address::ZERO,
            liveness_period: 86_400,
            ts_checkpoint: now - checkpoint_age,
            liveness_ratio: U256::from(ratio),
            current_request_count: current,
            baseline_request_count: baseline,
            error: None,
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn one_request_per_day_needs_two_with_margin() {
        // ≈1 req/day ratio, checkpoint 1000 s ago, no requests yet: the
        // liveness period dominates the effective period, ceil gives 1, the
        // safety margin takes it to 2.
        let s = status(11_574_074_074_074, 1_000, 0, 0);
        assert_eq!(s.effective_period(NOW), 86_400);
        assert_eq!(s.required_requests(NOW), 2);
        assert_eq!(s.requests_needed(NOW), 2);
        assert!(!s.is_eligible_for_rewards(NOW));
    }

    #[test]
    fn stale_checkpoint_extends_effective_period() {
        let s = status(11_574_074_074_074, 2 * 86_400, 0, 0);
        assert_eq!(s.effective_period(NOW), 2 * 86_400);
        // ceil(172800 * ratio / 1e18) = 2, +1 margin
        assert_eq!(s.required_requests(NOW), 3);
    }

    #[test]
    fn eligibility_flips_exactly_at_required_count() {
        let s = status(11_574_074_074_074, 1_000, 4, 5);
        assert_eq!(s.eligible_requests(), 1);
        assert!(!s.is_eligible_for_rewards(NOW));
        let s = status(11_574_074_074_074, 1_000, 4, 6);
        assert_eq!(s.eligible_requests(), 2);
        assert!(s.is_eligible_for_rewards(NOW));
        assert_eq!(s.requests_needed(NOW), 0);
    }

    #[test]
    fn counter_reset_below_baseline_saturates() {
        let s = status(11_574_074_074_074, 1_000, 10, 3);
        assert_eq!(s.eligible_requests(), 0);
    }

    #[test]
    fn errored_snapshot_is_never_eligible() {
        let mut s = status(0, 0, 100, 100);
        s.error = Some("rpc timeout".into());
        assert!(!s.is_eligible_for_rewards(NOW));
    }

    #[test]
    fn exact_ratio_division_skips_ceil_bump() {
        // 100 s period at 1e16 ratio: 100 * 1e16 = 1e18 exactly, so the
        // remainder bump must not fire. 1 + margin = 2.
        let s = ActivityStatus {
            service_config_id: "svc".into(),
            staking_contract: Address::ZERO,
            liveness_period: 100,
            ts_checkpoint: NOW,
            liveness_ratio: U256::from(10_000_000_000_000_000u64),
            current_request_count: 0,
            baseline_request_count: 0,
            error: None,
        };
        assert_eq!(s.required_requests(NOW), 2);
    }
}
