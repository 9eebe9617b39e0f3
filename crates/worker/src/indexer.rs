// Path: crates/worker/src/indexer.rs
//! External indexer client: request discovery for intake and the Tier B
//! delivery-status fallback for the delivery engine.

use alloy_primitives::{Address, B256};
use mech_types::error::IntakeError;
use mech_types::MarketRequest;
use serde::Deserialize;
use std::time::Duration;

pub struct IndexerClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DeliveryStatus {
    #[serde(default)]
    delivered: bool,
}

impl IndexerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IntakeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::Source(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// All still-undelivered requests addressed to any of the given mechs.
    /// The indexer guarantees `enabledTools` and `responseTimeout` fields.
    pub async fn list_unclaimed(
        &self,
        mechs: &[Address],
    ) -> Result<Vec<MarketRequest>, IntakeError> {
        let mechs_param = mechs
            .iter()
            .map(|m| format!("{m:#x}"))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/requests?mechs={mechs_param}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IntakeError::Source(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IntakeError::Source(format!(
                "indexer returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| IntakeError::Source(format!("bad request list: {e}")))
    }

    /// Tier B verification: has this request been delivered?
    pub async fn is_delivered(&self, request_id: B256) -> Result<bool, IntakeError> {
        let url = format!("{}/deliveries/{request_id:#x}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IntakeError::Source(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(IntakeError::Source(format!(
                "indexer returned {}",
                response.status()
            )));
        }
        let status: DeliveryStatus = response
            .json()
            .await
            .map_err(|e| IntakeError::Source(format!("bad delivery status: {e}")))?;
        Ok(status.delivered)
    }
}
