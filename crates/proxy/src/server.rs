// Path: crates/proxy/src/server.rs
//! The loopback HTTP server owning the service private key.
//!
//! Binds 127.0.0.1 on an ephemeral port; the URL and a random bearer token
//! are injected into the agent's environment. Every endpoint requires the
//! bearer. The proxy stays available even when a dispatch fails: downstream
//! failures surface as enveloped 5xx, never as a dead server.

use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::identity::{ActiveIdentity, IdentitySlot};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use mech_ipfs::IpfsStore;
use mech_telemetry::metrics;
use mech_types::error::{ErrorCode, IpfsError, ProxyError};
use mech_types::Envelope;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Mints the random bearer token handed to the agent subprocess.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

struct ProxyContext {
    token: String,
    identity: IdentitySlot,
    ipfs: Arc<IpfsStore>,
    dispatcher: Dispatcher,
    /// Serializes dispatches by Safe nonce; sign/IPFS routes run unlocked.
    dispatch_lock: tokio::sync::Mutex<()>,
}

enum AppError {
    Proxy(ProxyError),
    Ipfs(IpfsError),
}

impl From<ProxyError> for AppError {
    fn from(e: ProxyError) -> Self {
        Self::Proxy(e)
    }
}

impl From<IpfsError> for AppError {
    fn from(e: IpfsError) -> Self {
        Self::Ipfs(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Proxy(e) => {
                let status = match e {
                    ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
                    ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
                    ProxyError::Upstream(_) | ProxyError::Dispatch(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.code(), e.to_string())
            }
            AppError::Ipfs(e) => {
                let status = match e {
                    IpfsError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.code(), e.to_string())
            }
        };
        (status, Json(Envelope::<Value>::err(code, message))).into_response()
    }
}

async fn require_bearer(
    State(ctx): State<Arc<ProxyContext>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t == ctx.token)
        .unwrap_or(false);
    if !authorized {
        metrics::record_proxy_request("any", "unauthorized");
        return AppError::from(ProxyError::Unauthorized).into_response();
    }
    next.run(request).await
}

fn active_identity(ctx: &ProxyContext) -> Result<ActiveIdentity, ProxyError> {
    ctx.identity
        .read()
        .clone()
        .ok_or_else(|| ProxyError::Validation("no active service selected".to_string()))
}

#[derive(Serialize)]
struct AddressResponse {
    address: String,
}

async fn address_handler(
    State(ctx): State<Arc<ProxyContext>>,
) -> Result<Json<Envelope<AddressResponse>>, AppError> {
    let identity = active_identity(&ctx)?;
    metrics::record_proxy_request("address", "ok");
    Ok(Json(Envelope::ok(AddressResponse {
        address: identity.signer.address_hex(),
    })))
}

#[derive(Deserialize)]
struct SignRequest {
    message: String,
}

#[derive(Serialize)]
struct SignResponse {
    signature: String,
    address: String,
}

async fn sign_handler(
    State(ctx): State<Arc<ProxyContext>>,
    Json(body): Json<SignRequest>,
) -> Result<Json<Envelope<SignResponse>>, AppError> {
    let identity = active_identity(&ctx)?;
    let signature = identity
        .signer
        .personal_sign(body.message.as_bytes())
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    metrics::record_proxy_request("sign", "ok");
    Ok(Json(Envelope::ok(SignResponse {
        signature: format!("0x{}", hex::encode(signature)),
        address: identity.signer.address_hex(),
    })))
}

async fn sign_raw_handler(
    State(ctx): State<Arc<ProxyContext>>,
    Json(body): Json<SignRequest>,
) -> Result<Json<Envelope<SignResponse>>, AppError> {
    let identity = active_identity(&ctx)?;
    let raw = hex::decode(body.message.trim_start_matches("0x"))
        .map_err(|e| ProxyError::Validation(format!("message is not hex: {e}")))?;
    let signature = identity
        .signer
        .personal_sign(&raw)
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    metrics::record_proxy_request("sign-raw", "ok");
    Ok(Json(Envelope::ok(SignResponse {
        signature: format!("0x{}", hex::encode(signature)),
        address: identity.signer.address_hex(),
    })))
}

async fn sign_typed_data_handler(
    State(ctx): State<Arc<ProxyContext>>,
    Json(body): Json<Value>,
) -> Result<Json<Envelope<SignResponse>>, AppError> {
    let identity = active_identity(&ctx)?;
    for field in ["domain", "types", "primaryType", "message"] {
        if body.get(field).is_none() {
            return Err(
                ProxyError::Validation(format!("typed data missing '{field}'")).into(),
            );
        }
    }
    let signature = identity
        .signer
        .sign_typed_data(&body)
        .map_err(|e| ProxyError::Validation(e.to_string()))?;
    metrics::record_proxy_request("sign-typed-data", "ok");
    Ok(Json(Envelope::ok(SignResponse {
        signature: format!("0x{}", hex::encode(signature)),
        address: identity.signer.address_hex(),
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IpfsPutResponse {
    cid: String,
    digest_hex: String,
}

async fn ipfs_put_handler(
    State(ctx): State<Arc<ProxyContext>>,
    Json(body): Json<Value>,
) -> Result<Json<Envelope<IpfsPutResponse>>, AppError> {
    let stored = ctx.ipfs.put_json(&body).await?;
    metrics::record_proxy_request("ipfs-put", "ok");
    Ok(Json(Envelope::ok(IpfsPutResponse {
        digest_hex: stored.digest_hex(),
        cid: stored.cid,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpfsGetRequest {
    digest_hex: String,
}

async fn ipfs_get_handler(
    State(ctx): State<Arc<ProxyContext>>,
    Json(body): Json<IpfsGetRequest>,
) -> Result<Json<Envelope<Value>>, AppError> {
    let digest = body
        .digest_hex
        .parse::<alloy_primitives::B256>()
        .map_err(|e| ProxyError::Validation(format!("bad digest: {e}")))?;
    let content = ctx.ipfs.get_by_digest(digest).await?;
    metrics::record_proxy_request("ipfs-get", "ok");
    Ok(Json(Envelope::ok(json!({ "content": content }))))
}

async fn dispatch_handler(
    State(ctx): State<Arc<ProxyContext>>,
    Json(body): Json<DispatchRequest>,
) -> Result<Json<Envelope<crate::dispatch::DispatchResponse>>, AppError> {
    let identity = active_identity(&ctx)?;
    let _serialized = ctx.dispatch_lock.lock().await;
    let result = ctx.dispatcher.dispatch(&identity, body).await;
    match &result {
        Ok(_) => metrics::record_proxy_request("dispatch", "ok"),
        Err(_) => metrics::record_proxy_request("dispatch", "error"),
    }
    Ok(Json(Envelope::ok(result?)))
}

/// A running signing proxy.
pub struct SigningProxy {
    pub url: String,
    pub token: String,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl SigningProxy {
    /// Binds 127.0.0.1 on an ephemeral port and serves until dropped.
    pub async fn spawn(
        identity: IdentitySlot,
        ipfs: Arc<IpfsStore>,
        dispatcher: Dispatcher,
    ) -> std::io::Result<Self> {
        let token = generate_token();
        let ctx = Arc::new(ProxyContext {
            token: token.clone(),
            identity,
            ipfs,
            dispatcher,
            dispatch_lock: tokio::sync::Mutex::new(()),
        });

        let app = Router::new()
            .route("/address", get(address_handler))
            .route("/sign", post(sign_handler))
            .route("/sign-raw", post(sign_raw_handler))
            .route("/sign-typed-data", post(sign_typed_data_handler))
            .route("/dispatch", post(dispatch_handler))
            .route("/ipfs-put", post(ipfs_put_handler))
            .route("/ipfs-get", post(ipfs_get_handler))
            .layer(middleware::from_fn_with_state(ctx.clone(), require_bearer))
            .with_state(ctx);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(target: "proxy", error = %e, "signing proxy server error");
            }
        });

        tracing::info!(target: "proxy", event = "listening", %addr);
        Ok(Self {
            url: format!("http://{addr}"),
            token,
            addr,
            handle,
        })
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for SigningProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
