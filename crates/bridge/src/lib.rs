// Path: crates/bridge/src/lib.rs
//! # Mech Bridge
//!
//! Client for the credential bridge: the external service that hands out
//! short-lived provider tokens (GitHub, OpenAI, ...) to addresses whose ACL
//! grant has been provisioned.
//!
//! Every call carries a request-bound signature so the bridge can verify
//! the caller controls the service key without a session. A `402 Payment
//! Required` on token issuance triggers one x402 retry: the worker signs an
//! ERC-3009 `TransferWithAuthorization` and resends with an `X-Payment`
//! header.

use alloy_primitives::{keccak256, B256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mech_chain::EthSigner;
use mech_types::error::BridgeError;
use mech_types::unix_now;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Token handed out by the bridge for one provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Deserialize)]
struct CapabilitiesResponse {
    #[serde(default)]
    providers: Vec<String>,
}

/// One entry of a 402 response's `accepts` list (x402 wire shape).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequirements {
    scheme: String,
    network: String,
    max_amount_required: String,
    pay_to: String,
    asset: String,
    #[serde(default)]
    max_timeout_seconds: Option<u64>,
    #[serde(default)]
    extra: Value,
}

#[derive(Debug, Deserialize)]
struct PaymentRequiredBody {
    #[serde(default)]
    accepts: Vec<PaymentRequirements>,
}

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    signer: Arc<EthSigner>,
    chain_id: u64,
}

impl BridgeClient {
    pub fn new(
        base_url: &str,
        signer: Arc<EthSigner>,
        chain_id: u64,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Probe(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            chain_id,
        })
    }

    /// Asks the bridge which credential providers this address is granted.
    /// Passing a request id lets venture-scoped grants augment the global
    /// set for that one job.
    pub async fn probe_capabilities(
        &self,
        request_id: Option<&str>,
    ) -> Result<BTreeSet<String>, BridgeError> {
        let path = "/credentials/capabilities";
        let body = match request_id {
            Some(id) => json!({ "requestId": id }),
            None => json!({}),
        };
        let response = self
            .signed_post(path, &body, None)
            .await
            .map_err(|e| BridgeError::Probe(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Probe(format!(
                "bridge returned {}",
                response.status()
            )));
        }
        let parsed: CapabilitiesResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Probe(e.to_string()))?;
        Ok(parsed.providers.into_iter().collect())
    }

    /// Fetches a short-lived token for one provider, paying the x402 toll
    /// once if the bridge demands it.
    pub async fn fetch_provider_token(
        &self,
        provider: &str,
    ) -> Result<ProviderToken, BridgeError> {
        let path = format!("/credentials/{provider}");
        let body = json!({});

        let response = self
            .signed_post(&path, &body, None)
            .await
            .map_err(|e| token_err(provider, e.to_string()))?;

        let response = if response.status() == reqwest::StatusCode::PAYMENT_REQUIRED {
            let requirements: PaymentRequiredBody = response
                .json()
                .await
                .map_err(|e| BridgeError::Payment(format!("bad 402 body: {e}")))?;
            let header = self.payment_header(&requirements)?;
            tracing::info!(target: "bridge", event = "x402_retry", provider);
            self.signed_post(&path, &body, Some(&header))
                .await
                .map_err(|e| BridgeError::Payment(e.to_string()))?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(token_err(
                provider,
                format!("bridge returned {}", response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| token_err(provider, e.to_string()))
    }

    /// POST with the request-bound signature headers: the bridge recomputes
    /// `keccak(method \n path \n timestamp \n keccak(body))` and recovers
    /// the address from the personal signature.
    async fn signed_post(
        &self,
        path: &str,
        body: &Value,
        payment: Option<&str>,
    ) -> Result<reqwest::Response, BridgeError> {
        let raw = serde_json::to_vec(body).map_err(|e| BridgeError::Signature(e.to_string()))?;
        let timestamp = unix_now();
        let preimage = format!(
            "POST\n{path}\n{timestamp}\n{:#x}",
            keccak256(&raw)
        );
        let signature = self
            .signer
            .personal_sign(preimage.as_bytes())
            .map_err(|e| BridgeError::Signature(e.to_string()))?;

        let mut request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("content-type", "application/json")
            .header("x-machine-address", self.signer.address_hex())
            .header("x-machine-timestamp", timestamp.to_string())
            .header(
                "x-machine-signature",
                format!("0x{}", hex::encode(signature)),
            )
            .body(raw);
        if let Some(header) = payment {
            request = request.header("x-payment", header);
        }
        request
            .send()
            .await
            .map_err(|e| BridgeError::Probe(e.to_string()))
    }

    /// Builds the `X-Payment` header for the first acceptable `exact`
    /// requirement: base64 JSON carrying the signed ERC-3009 authorization.
    fn payment_header(&self, body: &PaymentRequiredBody) -> Result<String, BridgeError> {
        let req = body
            .accepts
            .iter()
            .find(|r| r.scheme == "exact")
            .ok_or_else(|| BridgeError::Payment("no 'exact' scheme offered".to_string()))?;

        let now = unix_now();
        let valid_before = now + req.max_timeout_seconds.unwrap_or(600);
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = B256::from(nonce);

        let token_name = req
            .extra
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("USD Coin");
        let token_version = req
            .extra
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("2");

        let authorization = json!({
            "from": self.signer.address_hex(),
            "to": req.pay_to,
            "value": req.max_amount_required,
            "validAfter": "0",
            "validBefore": valid_before.to_string(),
            "nonce": format!("{nonce:#x}"),
        });

        let typed = json!({
            "domain": {
                "name": token_name,
                "version": token_version,
                "chainId": self.chain_id,
                "verifyingContract": req.asset,
            },
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                "TransferWithAuthorization": [
                    { "name": "from", "type": "address" },
                    { "name": "to", "type": "address" },
                    { "name": "value", "type": "uint256" },
                    { "name": "validAfter", "type": "uint256" },
                    { "name": "validBefore", "type": "uint256" },
                    { "name": "nonce", "type": "bytes32" }
                ]
            },
            "primaryType": "TransferWithAuthorization",
            "message": authorization,
        });

        let signature = self
            .signer
            .sign_typed_data(&typed)
            .map_err(|e| BridgeError::Payment(e.to_string()))?;

        let envelope = json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": req.network,
            "payload": {
                "signature": format!("0x{}", hex::encode(signature)),
                "authorization": authorization,
            }
        });
        Ok(BASE64.encode(
            serde_json::to_vec(&envelope).map_err(|e| BridgeError::Payment(e.to_string()))?,
        ))
    }
}

fn token_err(provider: &str, message: String) -> BridgeError {
    BridgeError::Token {
        provider: provider.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_header_signs_exact_requirement() {
        let signer = Arc::new(EthSigner::from_key_bytes(&[0x42; 32]).unwrap());
        let client = BridgeClient::new(
            "http://127.0.0.1:1",
            signer.clone(),
            8453,
            Duration::from_secs(1),
        )
        .unwrap();

        let body = PaymentRequiredBody {
            accepts: vec![PaymentRequirements {
                scheme: "exact".into(),
                network: "base".into(),
                max_amount_required: "10000".into(),
                pay_to: "0x5e1d1eb61e1164d5a50b28c575da73a29995dff8".into(),
                asset: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".into(),
                max_timeout_seconds: Some(300),
                extra: json!({ "name": "USD Coin", "version": "2" }),
            }],
        };

        let header = client.payment_header(&body).unwrap();
        let decoded: Value =
            serde_json::from_slice(&BASE64.decode(header).unwrap()).unwrap();
        assert_eq!(decoded["x402Version"], 1);
        assert_eq!(decoded["scheme"], "exact");
        assert_eq!(
            decoded["payload"]["authorization"]["from"],
            signer.address_hex()
        );
        let sig = decoded["payload"]["signature"].as_str().unwrap();
        assert_eq!(sig.len(), 2 + 130);
    }

    #[test]
    fn payment_requires_exact_scheme() {
        let signer = Arc::new(EthSigner::from_key_bytes(&[0x42; 32]).unwrap());
        let client = BridgeClient::new(
            "http://127.0.0.1:1",
            signer,
            8453,
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client
            .payment_header(&PaymentRequiredBody { accepts: vec![] })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Payment(_)));
    }
}
