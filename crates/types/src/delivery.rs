// Path: crates/types/src/delivery.rs
//! Delivery payloads and agent results crossing the runner boundary.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Final status reported by the agent subprocess for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Completed,
    Delegating,
    Waiting,
    Failed,
}

/// Reference to an artifact the agent produced and pinned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub cid: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
}

/// What the agent subprocess hands back when it exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub output: String,
    /// Tool-call trace and whatever else the agent recorded.
    #[serde(default)]
    pub telemetry: Value,
    pub final_status: FinalStatus,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<Value>,
}

/// JSON object uploaded to IPFS; its digest is what goes on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub request_id: String,
    pub result: String,
    pub telemetry: Value,
    pub final_status: FinalStatus,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<Value>,
}

impl DeliveryPayload {
    /// Builds the on-chain payload from an agent result.
    pub fn from_agent_result(request_id_hex: &str, result: AgentResult) -> Self {
        Self {
            request_id: request_id_hex.to_string(),
            result: result.output,
            telemetry: result.telemetry,
            final_status: result.final_status,
            artifacts: result.artifacts,
            recognition: result.recognition,
            reflection: result.reflection,
        }
    }
}

/// Terminal outcome of a delivery attempt. Failures are carried by
/// `DeliveryError`; these are the success-shaped endings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered. The hash is absent when someone else's transaction (or an
    /// earlier attempt we lost track of) did the work.
    Done { tx_hash: Option<B256> },
    /// The contract accepted the transaction but rejected the content.
    Revoked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn final_status_wire_names_are_screaming() {
        assert_eq!(
            serde_json::to_string(&FinalStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        let s: FinalStatus = serde_json::from_str("\"DELEGATING\"").unwrap();
        assert_eq!(s, FinalStatus::Delegating);
    }

    #[test]
    fn agent_result_accepts_minimal_object() {
        let r: AgentResult = serde_json::from_value(json!({
            "output": "done",
            "final_status": "COMPLETED"
        }))
        .unwrap();
        assert!(r.artifacts.is_empty());
        assert!(r.recognition.is_none());
    }

    #[test]
    fn artifact_type_round_trips_under_wire_name() {
        let a: ArtifactRef = serde_json::from_value(json!({
            "cid": "bafy123",
            "topic": "report",
            "type": "text/markdown"
        }))
        .unwrap();
        assert_eq!(a.artifact_type.as_deref(), Some("text/markdown"));
        let back = serde_json::to_value(&a).unwrap();
        assert_eq!(back["type"], "text/markdown");
        assert!(back.get("name").is_none());
    }
}
