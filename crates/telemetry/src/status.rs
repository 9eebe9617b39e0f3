// Path: crates/telemetry/src/status.rs
//! Process status shared between the worker loop and the liveness endpoint.

use mech_types::unix_now;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default)]
struct StatusInner {
    active_service: Option<String>,
    staking_dashboard: Option<Value>,
    extra: Option<Value>,
}

/// Cloneable handle the worker loop writes and the HTTP server reads.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    started_at: u64,
    process_id: String,
    inner: Arc<RwLock<StatusInner>>,
}

impl StatusHandle {
    pub fn new(process_id: &str) -> Self {
        Self {
            started_at: unix_now(),
            process_id: process_id.to_string(),
            inner: Arc::new(RwLock::new(StatusInner::default())),
        }
    }

    /// Records the currently selected service identity.
    pub fn set_active_service(&self, service_config_id: Option<String>) {
        self.inner.write().active_service = service_config_id;
    }

    pub fn active_service(&self) -> Option<String> {
        self.inner.read().active_service.clone()
    }

    /// Attaches the staking dashboard projection (immutable contract reads).
    pub fn set_staking_dashboard(&self, dashboard: Value) {
        self.inner.write().staking_dashboard = Some(dashboard);
    }

    /// Free-form process detail (e.g. the supervisor's child table).
    pub fn set_extra(&self, extra: Value) {
        self.inner.write().extra = Some(extra);
    }

    /// The `/status` payload.
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.read();
        json!({
            "process_id": self.process_id,
            "started_at": self.started_at,
            "uptime_secs": unix_now().saturating_sub(self.started_at),
            "active_service": inner.active_service,
            "staking_dashboard": inner.staking_dashboard,
            "extra": inner.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_active_service_updates() {
        let handle = StatusHandle::new("worker-3");
        assert_eq!(handle.snapshot()["active_service"], Value::Null);

        handle.set_active_service(Some("alpha".into()));
        let snap = handle.snapshot();
        assert_eq!(snap["active_service"], "alpha");
        assert_eq!(snap["process_id"], "worker-3");

        handle.set_active_service(None);
        assert_eq!(handle.snapshot()["active_service"], Value::Null);
    }

    #[test]
    fn dashboard_appears_in_snapshot() {
        let handle = StatusHandle::new("worker-0");
        handle.set_staking_dashboard(json!({ "min_staking_deposit": "1000" }));
        assert_eq!(
            handle.snapshot()["staking_dashboard"]["min_staking_deposit"],
            "1000"
        );
    }
}
