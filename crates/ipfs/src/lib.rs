// Path: crates/ipfs/src/lib.rs
//! # Mech IPFS
//!
//! Payload storage for deliveries and dispatches. Content goes to the
//! worker's embedded IPFS node (bitswap distributes it to peers); a public
//! gateway upload remains as a transitional fallback. The on-chain digest is
//! the sha2-256 multihash digest of the returned CID, passed as `bytes32`
//! to `deliverToMarketplace`.

use alloy_primitives::B256;
use cid::multihash::Multihash;
use cid::Cid;
use mech_types::error::IpfsError;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const SHA2_256: u64 = 0x12;

/// Result of an upload: the CID as the node printed it plus the on-chain
/// digest form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub cid: String,
    pub digest: B256,
}

impl StoredContent {
    /// `0x`-prefixed digest hex, the wire form callers pass on-chain.
    pub fn digest_hex(&self) -> String {
        format!("{:#x}", self.digest)
    }
}

/// Extracts the 32-byte sha2-256 digest from a CID string (v0 or v1).
pub fn digest_from_cid(cid_str: &str) -> Result<B256, IpfsError> {
    let cid = Cid::try_from(cid_str)
        .map_err(|e| IpfsError::Digest(format!("unparseable CID '{cid_str}': {e}")))?;
    let hash = cid.hash();
    if hash.code() != SHA2_256 || hash.digest().len() != 32 {
        return Err(IpfsError::Digest(format!(
            "CID '{cid_str}' does not carry a sha2-256 multihash"
        )));
    }
    Ok(B256::from_slice(hash.digest()))
}

/// Rebuilds the CIDv0 string for a digest previously derived by
/// [`digest_from_cid`]; used by content reads keyed on the on-chain digest.
pub fn cid_v0_from_digest(digest: B256) -> Result<String, IpfsError> {
    let multihash = Multihash::<64>::wrap(SHA2_256, digest.as_slice())
        .map_err(|e| IpfsError::Digest(e.to_string()))?;
    let cid = Cid::new_v0(multihash).map_err(|e| IpfsError::Digest(e.to_string()))?;
    Ok(cid.to_string())
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Client for the worker-local IPFS node plus the optional gateway.
pub struct IpfsStore {
    http: reqwest::Client,
    api_url: String,
    gateway_url: Option<String>,
}

impl IpfsStore {
    pub fn new(
        api_url: &str,
        gateway_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, IpfsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IpfsError::Upload(e.to_string()))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.map(|g| g.trim_end_matches('/').to_string()),
        })
    }

    /// Adds a JSON document to the local node; returns CID + digest.
    pub async fn put_json(&self, content: &Value) -> Result<StoredContent, IpfsError> {
        let body =
            serde_json::to_vec(content).map_err(|e| IpfsError::Upload(e.to_string()))?;
        let cid = self.add(&self.api_url, body).await?;
        let digest = digest_from_cid(&cid)?;
        Ok(StoredContent { cid, digest })
    }

    /// Uploads the same document through the public gateway. Transitional
    /// fallback distribution path; callers treat failure as non-fatal.
    pub async fn publish_via_gateway(&self, content: &Value) -> Result<StoredContent, IpfsError> {
        let gateway = self
            .gateway_url
            .as_deref()
            .ok_or_else(|| IpfsError::Gateway("no gateway configured".to_string()))?;
        let body =
            serde_json::to_vec(content).map_err(|e| IpfsError::Gateway(e.to_string()))?;
        let cid = self
            .add(gateway, body)
            .await
            .map_err(|e| IpfsError::Gateway(e.to_string()))?;
        let digest = digest_from_cid(&cid)?;
        Ok(StoredContent { cid, digest })
    }

    /// Reads a JSON document from the local node by its on-chain digest.
    pub async fn get_by_digest(&self, digest: B256) -> Result<Value, IpfsError> {
        let cid = cid_v0_from_digest(digest)?;
        let url = format!("{}/api/v0/cat?arg={cid}", self.api_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| IpfsError::Upload(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status().is_server_error()
        {
            return Err(IpfsError::NotFound(format!("{digest:#x}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IpfsError::Upload(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IpfsError::Upload(format!("stored content is not JSON: {e}")))
    }

    async fn add(&self, base: &str, body: Vec<u8>) -> Result<String, IpfsError> {
        let part = reqwest::multipart::Part::bytes(body).file_name("payload.json");
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = format!("{base}/api/v0/add?cid-version=0");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| IpfsError::Upload(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IpfsError::Upload(format!(
                "add returned {}",
                response.status()
            )));
        }
        let parsed: AddResponse = response
            .json()
            .await
            .map_err(|e| IpfsError::Upload(format!("bad add response: {e}")))?;
        Ok(parsed.hash)
    }
}
