// Path: crates/types/src/config.rs
//! Configuration structures for the worker and supervisor processes
//! (`worker.toml`, `supervisor.toml`).

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a single worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Ethereum JSON-RPC endpoint.
    pub rpc_url: String,
    /// Chain id the services live on.
    pub chain_id: u64,
    /// Directory holding one JSON profile per service.
    pub profile_dir: PathBuf,
    /// Stable worker identity, also used as the lease owner id.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// External indexer for request discovery and delivery-status fallback.
    #[serde(default)]
    pub indexer_url: Option<String>,
    /// Control-plane lease broker. Absent means the in-process broker
    /// (single-worker deployments).
    #[serde(default)]
    pub control_plane_url: Option<String>,
    /// Credential bridge. Absent disables the bridge probe (empty grants).
    #[serde(default)]
    pub bridge_url: Option<String>,
    /// Marketplace contract; required for the proxy's dispatch path.
    #[serde(default)]
    pub marketplace_address: Option<Address>,

    /// Worker-local IPFS node API.
    #[serde(default = "default_ipfs_api_url")]
    pub ipfs_api_url: String,
    /// Public gateway used as transitional upload fallback.
    #[serde(default)]
    pub ipfs_gateway_url: Option<String>,

    /// GitHub API base for the operator-capability liveness check.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Operator GitHub token; absence simply drops the capability.
    #[serde(default)]
    pub github_token: Option<String>,

    /// Command line used to spawn the agent subprocess.
    #[serde(default)]
    pub agent_command: Vec<String>,

    /// Rotation re-evaluation interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// TTL of the checkpoint cache in the activity monitor.
    #[serde(default = "default_checkpoint_ttl_secs")]
    pub checkpoint_ttl_secs: u64,
    /// Staleness horizon for pending-delivery entries.
    #[serde(default = "default_pending_stale_secs")]
    pub pending_stale_secs: u64,
    /// Grace period between agent interrupt and hard kill.
    #[serde(default = "default_agent_grace_secs")]
    pub agent_grace_secs: u64,

    /// Generic RPC call timeout.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Credential-bridge call timeout.
    #[serde(default = "default_bridge_timeout_secs")]
    pub bridge_timeout_secs: u64,
    /// Outer deadline for one delivery attempt.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

fn default_worker_id() -> String {
    "worker-0".to_string()
}
fn default_ipfs_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_poll_interval_ms() -> u64 {
    60_000
}
fn default_checkpoint_ttl_secs() -> u64 {
    60
}
fn default_pending_stale_secs() -> u64 {
    180
}
fn default_agent_grace_secs() -> u64 {
    30
}
fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_bridge_timeout_secs() -> u64 {
    10
}
fn default_delivery_timeout_secs() -> u64 {
    240
}

/// Configuration for the supervisor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Number of worker subprocesses to run.
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,
    /// Liveness endpoint bind address.
    #[serde(default = "default_liveness_addr")]
    pub liveness_addr: String,
    /// Seconds between SIGTERM fan-out and SIGKILL.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Worker binary path; defaults to a sibling of the supervisor binary.
    #[serde(default)]
    pub worker_bin: Option<PathBuf>,
    /// Extra arguments passed to every worker child.
    #[serde(default)]
    pub worker_args: Vec<String>,
}

fn default_worker_count() -> u32 {
    1
}
fn default_liveness_addr() -> String {
    "127.0.0.1:9615".to_string()
}
fn default_shutdown_grace_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_minimal_toml_gets_defaults() {
        let cfg: WorkerConfig = toml::from_str(
            r#"
            rpc_url = "http://127.0.0.1:8545"
            chain_id = 100
            profile_dir = "/var/lib/mech/services"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poll_interval_ms, 60_000);
        assert_eq!(cfg.checkpoint_ttl_secs, 60);
        assert_eq!(cfg.pending_stale_secs, 180);
        assert_eq!(cfg.agent_grace_secs, 30);
        assert_eq!(cfg.rpc_timeout_secs, 30);
        assert_eq!(cfg.bridge_timeout_secs, 10);
        assert_eq!(cfg.delivery_timeout_secs, 240);
        assert_eq!(cfg.worker_id, "worker-0");
        assert!(cfg.indexer_url.is_none());
    }

    #[test]
    fn supervisor_defaults() {
        let cfg: SupervisorConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.worker_count, 1);
        assert_eq!(cfg.shutdown_grace_secs, 5);
    }
}
