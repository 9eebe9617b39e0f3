// Path: crates/chain/src/backoff.rs
//! Exponential backoff with deterministic jitter.
//!
//! Jitter is derived from a caller-supplied seed (request id, attempt
//! counter) rather than a RNG so that retry timing is reproducible in tests
//! and two workers retrying the same request do not stay in lockstep.

use std::time::Duration;

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
/// plus `seed % jitter_ms` milliseconds, capped at `max`.
pub fn delay(attempt: u32, base: Duration, jitter_ms: u64, max: Duration, seed: u64) -> Duration {
    let exp = attempt.min(20);
    let backoff = base.saturating_mul(1u32 << exp).min(max);
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(seed % jitter_ms)
    };
    backoff.saturating_add(jitter)
}

/// The nonce-conflict ladder: 15, 30, 60, 120, 240 seconds.
pub fn nonce_ladder(attempt: u32) -> Duration {
    let secs = 15u64.saturating_mul(1 << attempt.min(4));
    Duration::from_secs(secs.min(240))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(600);
        assert_eq!(delay(0, base, 0, max, 0), Duration::from_secs(1));
        assert_eq!(delay(1, base, 0, max, 0), Duration::from_secs(2));
        assert_eq!(delay(4, base, 0, max, 0), Duration::from_secs(16));
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(600);
        let a = delay(0, base, 500, max, 1234);
        let b = delay(0, base, 500, max, 1234);
        assert_eq!(a, b);
        assert!(a >= Duration::from_secs(1));
        assert!(a < Duration::from_millis(1500));
    }

    #[test]
    fn nonce_ladder_matches_policy() {
        assert_eq!(nonce_ladder(0), Duration::from_secs(15));
        assert_eq!(nonce_ladder(1), Duration::from_secs(30));
        assert_eq!(nonce_ladder(2), Duration::from_secs(60));
        assert_eq!(nonce_ladder(3), Duration::from_secs(120));
        assert_eq!(nonce_ladder(4), Duration::from_secs(240));
        assert_eq!(nonce_ladder(9), Duration::from_secs(240));
    }
}
