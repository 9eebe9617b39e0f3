// Path: crates/types/src/request.rs
//! Marketplace requests as surfaced by the intake source.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer, Serialize};

/// A unit of work addressed to a mech, still undelivered at discovery time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketRequest {
    /// On-chain request id. Sources disagree on the wire form (0x-hex,
    /// decimal string, or number); all of them normalize to 32 bytes.
    #[serde(deserialize_with = "deserialize_request_id")]
    pub request_id: B256,
    /// Priority mech: the endpoint the requester addressed. Other mechs may
    /// deliver only after `response_timeout` has passed.
    pub mech: Address,
    /// Epoch seconds after which the priority window is over.
    pub response_timeout: u64,
    /// Tool identifiers the agent is allowed to use for this job.
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    /// Opaque job blueprint handed to the agent subprocess.
    #[serde(default)]
    pub blueprint: String,
    /// Stable job-definition identifier, when the source supplies one.
    #[serde(default)]
    pub job_definition_id: Option<String>,
}

impl MarketRequest {
    /// Hex form of the request id as submitted on-chain.
    pub fn request_id_hex(&self) -> String {
        format!("{:#x}", self.request_id)
    }

    /// Whether the priority window has expired, opening the request to
    /// delivery by non-priority mechs.
    pub fn priority_window_expired(&self, now: u64) -> bool {
        now > self.response_timeout
    }
}

fn deserialize_request_id<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Number(u64),
        Text(String),
    }

    let value = match Wire::deserialize(deserializer)? {
        Wire::Number(n) => U256::from(n),
        Wire::Text(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16)
                    .map_err(|e| D::Error::custom(format!("bad hex request id '{s}': {e}")))?
            } else {
                U256::from_str_radix(s, 10)
                    .map_err(|e| D::Error::custom(format!("bad decimal request id '{s}': {e}")))?
            }
        }
    };
    Ok(B256::from(value.to_be_bytes::<32>()))
}

/// Proof that this worker holds the at-most-once lease on a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseToken {
    pub request_id: B256,
    pub worker_id: String,
    /// Opaque token minted by the lease broker.
    pub token: String,
}

/// Result of a claim attempt against the lease broker.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The lease is ours; the request moves to execution.
    Leased(LeaseToken),
    /// Another worker won the race.
    AlreadyClaimed,
    /// The broker rejected the claim outright (policy, not a race).
    Rejected(String),
}
