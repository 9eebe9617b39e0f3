// Path: crates/types/src/service.rs
//! Service identity: the (mech, Safe, agent key, chain, staking) tuple the
//! worker can operate.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// On-disk shape of a single service profile (one JSON file per service in
/// the profile directory; the file stem is the stable config id).
///
/// `service_id == -1` marks a service that has not been registered on-chain
/// yet; such profiles are parsed but excluded from rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProfile {
    /// On-chain service id. `-1` until minting completes.
    #[serde(default = "default_unregistered")]
    pub service_id: i64,
    /// The mech endpoint this service operates.
    pub mech_address: Address,
    /// The 1-of-1 Gnosis Safe that owns all on-chain writes.
    #[serde(default)]
    pub safe_address: Option<Address>,
    /// The agent EOA (sole Safe owner).
    pub agent_address: Address,
    /// Path to the decrypted 32-byte hex private key of the agent EOA.
    /// Only the signing proxy ever reads this file.
    #[serde(default)]
    pub agent_key_file: Option<PathBuf>,
    /// EVM chain id the service lives on.
    pub chain_id: u64,
    /// Staking contract, absent for unstaked services.
    #[serde(default)]
    pub staking_contract: Option<Address>,
}

fn default_unregistered() -> i64 {
    -1
}

/// A validated, rotation-eligible service. Immutable for the process
/// lifetime. The private key itself never appears here; only the proxy
/// resolves `key_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Stable id derived from the profile file stem.
    pub service_config_id: String,
    /// On-chain service id (validated non-negative).
    pub service_id: u64,
    pub mech_address: Address,
    pub safe_address: Address,
    pub agent_address: Address,
    /// Path to the agent key material, resolved relative to the profile dir.
    pub key_file: PathBuf,
    pub chain_id: u64,
    pub staking_contract: Option<Address>,
}

impl Service {
    /// Validates a parsed profile into a rotation-eligible service.
    /// Returns `None` for profiles that cannot rotate: missing Safe,
    /// missing key, or unregistered on-chain id.
    pub fn from_profile(config_id: &str, profile: ServiceProfile) -> Option<Self> {
        let safe_address = profile.safe_address?;
        let key_file = profile.agent_key_file?;
        if profile.service_id < 0 {
            return None;
        }
        Some(Self {
            service_config_id: config_id.to_string(),
            service_id: profile.service_id as u64,
            mech_address: profile.mech_address,
            safe_address,
            agent_address: profile.agent_address,
            key_file,
            chain_id: profile.chain_id,
            staking_contract: profile.staking_contract,
        })
    }

    /// True for services that participate in staking eligibility math.
    pub fn is_staked(&self) -> bool {
        self.staking_contract.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn profile() -> ServiceProfile {
        ServiceProfile {
            service_id: 7,
            mech_address: address!("77af31de935740567cf4ff1986d04b2c964a786a"),
            safe_address: Some(address!("5e1d1eb61e1164d5a50b28c575da73a29995dff8")),
            agent_address: address!("8c6d0b3e5f6b3c0f8ddc2b0f2a1c9d3e4f5a6b7c"),
            agent_key_file: Some(PathBuf::from("keys/agent.hex")),
            chain_id: 100,
            staking_contract: None,
        }
    }

    #[test]
    fn validates_complete_profile() {
        let svc = Service::from_profile("alpha", profile()).unwrap();
        assert_eq!(svc.service_config_id, "alpha");
        assert_eq!(svc.service_id, 7);
        assert!(!svc.is_staked());
    }

    #[test]
    fn rejects_missing_safe() {
        let mut p = profile();
        p.safe_address = None;
        assert!(Service::from_profile("alpha", p).is_none());
    }

    #[test]
    fn rejects_missing_key_file() {
        let mut p = profile();
        p.agent_key_file = None;
        assert!(Service::from_profile("alpha", p).is_none());
    }

    #[test]
    fn rejects_unregistered_service_id() {
        let mut p = profile();
        p.service_id = -1;
        assert!(Service::from_profile("alpha", p).is_none());
    }

    #[test]
    fn profile_json_roundtrip_defaults() {
        let parsed: ServiceProfile = serde_json::from_str(
            r#"{
                "mech_address": "0x77af31de935740567cf4ff1986d04b2c964a786a",
                "agent_address": "0x8c6d0b3e5f6b3c0f8ddc2b0f2a1c9d3e4f5a6b7c",
                "chain_id": 100
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.service_id, -1);
        assert!(parsed.safe_address.is_none());
        assert!(parsed.staking_contract.is_none());
    }
}
