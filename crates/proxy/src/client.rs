// Path: crates/proxy/src/client.rs
//! Agent-side client for the signing proxy.
//!
//! Contract: 10 s request timeout; at most two retries with exponential
//! backoff (500 ms · 2ⁿ) on transport errors and 5xx; 4xx is never retried;
//! the proxy's stable `code` is propagated to callers.

use crate::dispatch::DispatchRequest;
use mech_types::{Envelope, Meta};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Error mapped from the proxy's `{meta: {ok, code, message}}` envelope or
/// the transport underneath it.
#[derive(Debug, Clone)]
pub struct ProxyClientError {
    /// Stable code from the proxy, absent for transport failures.
    pub code: Option<String>,
    pub message: String,
    /// HTTP status when a response was received.
    pub status: Option<u16>,
}

impl std::fmt::Display for ProxyClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "proxy error {code}: {}", self.message),
            None => write!(f, "proxy transport error: {}", self.message),
        }
    }
}

impl std::error::Error for ProxyClientError {}

impl ProxyClientError {
    fn transport(message: String) -> Self {
        Self {
            code: None,
            message,
            status: None,
        }
    }

    fn from_meta(meta: &Meta, status: u16) -> Self {
        Self {
            code: meta.code.clone(),
            message: meta.message.clone().unwrap_or_default(),
            status: Some(status),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedMessage {
    pub signature: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRef {
    pub cid: String,
    pub digest_hex: String,
}

pub struct ProxyClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ProxyClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ProxyClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProxyClientError::transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Builds a client from `SIGNING_PROXY_URL` / `SIGNING_PROXY_TOKEN`.
    pub fn from_env() -> Result<Self, ProxyClientError> {
        let url = std::env::var("SIGNING_PROXY_URL")
            .map_err(|_| ProxyClientError::transport("SIGNING_PROXY_URL not set".into()))?;
        let token = std::env::var("SIGNING_PROXY_TOKEN")
            .map_err(|_| ProxyClientError::transport("SIGNING_PROXY_TOKEN not set".into()))?;
        Self::new(&url, &token)
    }

    pub async fn address(&self) -> Result<String, ProxyClientError> {
        #[derive(Deserialize)]
        struct AddressData {
            address: String,
        }
        let data: AddressData = self.call(reqwest::Method::GET, "/address", None).await?;
        Ok(data.address)
    }

    pub async fn sign(&self, message: &str) -> Result<SignedMessage, ProxyClientError> {
        self.call(
            reqwest::Method::POST,
            "/sign",
            Some(json!({ "message": message })),
        )
        .await
    }

    pub async fn sign_raw(&self, message_hex: &str) -> Result<SignedMessage, ProxyClientError> {
        self.call(
            reqwest::Method::POST,
            "/sign-raw",
            Some(json!({ "message": message_hex })),
        )
        .await
    }

    pub async fn sign_typed_data(&self, typed: &Value) -> Result<SignedMessage, ProxyClientError> {
        self.call(reqwest::Method::POST, "/sign-typed-data", Some(typed.clone()))
            .await
    }

    pub async fn ipfs_put(&self, content: &Value) -> Result<StoredRef, ProxyClientError> {
        self.call(reqwest::Method::POST, "/ipfs-put", Some(content.clone()))
            .await
    }

    pub async fn ipfs_get(&self, digest_hex: &str) -> Result<Value, ProxyClientError> {
        #[derive(Deserialize)]
        struct GetData {
            content: Value,
        }
        let data: GetData = self
            .call(
                reqwest::Method::POST,
                "/ipfs-get",
                Some(json!({ "digestHex": digest_hex })),
            )
            .await?;
        Ok(data.content)
    }

    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<Vec<String>, ProxyClientError> {
        #[derive(Deserialize)]
        struct DispatchData {
            request_ids: Vec<String>,
        }
        let body = json!({
            "prompts": request.prompts,
            "tools": request.tools,
            "ipfsJsonContents": request.ipfs_json_contents,
            "postOnly": request.post_only,
            "responseTimeout": request.response_timeout,
        });
        let data: DispatchData = self
            .call(reqwest::Method::POST, "/dispatch", Some(body))
            .await?;
        Ok(data.request_ids)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ProxyClientError> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0u32;
        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token);
            if let Some(body) = &body {
                request = request.json(body);
            }

            let outcome = match request.send().await {
                Err(e) => Err(ProxyClientError::transport(e.to_string())),
                Ok(response) => {
                    let status = response.status();
                    let envelope: Envelope<T> = response.json().await.map_err(|e| {
                        ProxyClientError::transport(format!("bad envelope: {e}"))
                    })?;
                    if envelope.meta.ok {
                        match envelope.data {
                            Some(data) => return Ok(data),
                            None => {
                                return Err(ProxyClientError::transport(
                                    "envelope ok but data missing".to_string(),
                                ))
                            }
                        }
                    }
                    let err = ProxyClientError::from_meta(&envelope.meta, status.as_u16());
                    if status.is_client_error() {
                        // 4xx is deterministic; retrying cannot help.
                        return Err(err);
                    }
                    Err(err)
                }
            };

            match outcome {
                Err(err) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    tracing::debug!(
                        target: "proxy-client",
                        event = "retry",
                        path,
                        attempt,
                        error = %err,
                    );
                    tokio::time::sleep(RETRY_BASE * 2u32.pow(attempt - 1)).await;
                }
                Err(err) => return Err(err),
                Ok(never) => return Ok(never),
            }
        }
    }
}
