// Path: crates/worker/src/capability.rs
//! Probes what this operator can actually do.
//!
//! Phase 1: ask the credential bridge which providers this address is
//! granted (empty on any failure). Phase 2: validate local operator
//! capabilities with targeted liveness checks (GitHub: `GET /user` with the
//! configured token). Both results are cached after the first success and
//! invalidated on service rotation.

use mech_bridge::BridgeClient;
use mech_types::CapabilityProfile;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub struct CapabilityProbe {
    bridge: Option<Arc<BridgeClient>>,
    github_api_url: String,
    github_token: Option<String>,
    http: reqwest::Client,
    cache: RwLock<Option<CapabilityProfile>>,
}

impl CapabilityProbe {
    pub fn new(
        bridge: Option<Arc<BridgeClient>>,
        github_api_url: &str,
        github_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            bridge,
            github_api_url: github_api_url.trim_end_matches('/').to_string(),
            github_token,
            http,
            cache: RwLock::new(None),
        }
    }

    /// Cached probe of both phases.
    pub async fn probe(&self) -> CapabilityProfile {
        if let Some(profile) = self.cache.read().clone() {
            return profile;
        }
        let profile = self.probe_uncached(None).await;
        *self.cache.write() = Some(profile.clone());
        profile
    }

    /// Per-request re-probe: passes the request id so venture-scoped grants
    /// can augment the global set for this one job. Never cached.
    pub async fn probe_for_request(&self, request_id: &str) -> CapabilityProfile {
        let mut profile = self.probe_uncached(Some(request_id)).await;
        // The request-scoped grant set can only add to the global one.
        if let Some(global) = self.cache.read().clone() {
            profile
                .credential_providers
                .extend(global.credential_providers);
            profile
                .operator_capabilities
                .extend(global.operator_capabilities);
        }
        profile
    }

    /// Dropped on rotation: the next probe runs against the new identity.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    async fn probe_uncached(&self, request_id: Option<&str>) -> CapabilityProfile {
        let credential_providers = match &self.bridge {
            Some(bridge) => match bridge.probe_capabilities(request_id).await {
                Ok(providers) => providers,
                Err(e) => {
                    tracing::warn!(
                        target: "capability",
                        event = "bridge_probe_failed",
                        error = %e,
                        "treating credential grants as empty"
                    );
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };

        let mut operator_capabilities = BTreeSet::new();
        if self.github_token_works().await {
            operator_capabilities.insert("github".to_string());
        }

        tracing::info!(
            target: "capability",
            event = "probed",
            providers = credential_providers.len(),
            operator = operator_capabilities.len(),
        );
        CapabilityProfile {
            credential_providers,
            operator_capabilities,
        }
    }

    /// GitHub liveness check: the capability exists only on a 2xx `GET /user`.
    async fn github_token_works(&self) -> bool {
        let Some(token) = &self.github_token else {
            return false;
        };
        let result = self
            .http
            .get(format!("{}/user", self.github_api_url))
            .header("authorization", format!("Bearer {token}"))
            .header("user-agent", "mech-worker")
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(target: "capability", event = "github_check_failed", error = %e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};

    async fn spawn_github(valid_token: &'static str) -> String {
        let app = Router::new().route(
            "/user",
            get(move |headers: axum::http::HeaderMap| async move {
                let ok = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v == format!("Bearer {valid_token}"))
                    .unwrap_or(false);
                if ok {
                    (axum::http::StatusCode::OK, "{}")
                } else {
                    (axum::http::StatusCode::UNAUTHORIZED, "{}")
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn working_github_token_grants_the_capability() {
        let url = spawn_github("good").await;
        let probe = CapabilityProbe::new(
            None,
            &url,
            Some("good".into()),
            Duration::from_secs(2),
        );
        let profile = probe.probe().await;
        assert!(profile.operator_capabilities.contains("github"));
        assert!(profile.credential_providers.is_empty());
    }

    #[tokio::test]
    async fn rejected_token_drops_the_capability() {
        let url = spawn_github("good").await;
        let probe = CapabilityProbe::new(
            None,
            &url,
            Some("stale".into()),
            Duration::from_secs(2),
        );
        let profile = probe.probe().await;
        assert!(profile.operator_capabilities.is_empty());
    }

    #[tokio::test]
    async fn missing_token_skips_the_check_entirely() {
        let probe = CapabilityProbe::new(
            None,
            "http://127.0.0.1:9",
            None,
            Duration::from_millis(100),
        );
        let profile = probe.probe().await;
        assert!(profile.operator_capabilities.is_empty());
    }

    #[tokio::test]
    async fn probe_is_cached_until_invalidated() {
        let url = spawn_github("good").await;
        let probe = CapabilityProbe::new(
            None,
            &url,
            Some("good".into()),
            Duration::from_secs(2),
        );
        assert!(probe.probe().await.operator_capabilities.contains("github"));

        // Token goes stale but the cache still answers.
        // (The cached profile is returned without re-checking.)
        let cached = probe.probe().await;
        assert!(cached.operator_capabilities.contains("github"));

        probe.invalidate();
        let fresh = probe.probe().await;
        assert!(fresh.operator_capabilities.contains("github"));
    }
}
