// Path: crates/proxy/tests/proxy_server.rs
//! End-to-end signing proxy behavior: auth, signing roundtrips, IPFS
//! plumbing, and the client retry contract.

use alloy_primitives::Signature;
use axum::{routing::post, Json, Router};
use mech_chain::{EthSigner, RpcClient, SafeRouter};
use mech_ipfs::IpfsStore;
use mech_proxy::dispatch::Dispatcher;
use mech_proxy::{new_identity_slot, ActiveIdentity, IdentitySlot, ProxyClient, SigningProxy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const KNOWN_CID: &str = "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn";

async fn spawn_ipfs_stub() -> String {
    let app = Router::new()
        .route(
            "/api/v0/add",
            post(|| async {
                Json(json!({ "Name": "payload.json", "Hash": KNOWN_CID, "Size": "1" }))
            }),
        )
        .route(
            "/api/v0/cat",
            post(|| async {
                (
                    axum::http::StatusCode::OK,
                    serde_json::to_vec(&json!({ "stored": true })).unwrap(),
                )
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_proxy() -> (SigningProxy, IdentitySlot, Arc<EthSigner>) {
    let ipfs_url = spawn_ipfs_stub().await;
    let ipfs = Arc::new(IpfsStore::new(&ipfs_url, None, Duration::from_secs(5)).unwrap());
    // RPC is never reached by the routes under test.
    let rpc = Arc::new(RpcClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap());

    let signer = Arc::new(EthSigner::from_key_bytes(&[0x42; 32]).unwrap());
    let router = Arc::new(SafeRouter::new(
        rpc.clone(),
        signer.clone(),
        alloy_primitives::Address::repeat_byte(0x55),
        100,
    ));

    let slot = new_identity_slot();
    *slot.write() = Some(ActiveIdentity {
        service_config_id: "alpha".into(),
        mech: alloy_primitives::Address::repeat_byte(0xaa),
        signer: signer.clone(),
        router,
        marketplace: None,
    });

    let dispatcher = Dispatcher::new(rpc, ipfs.clone(), Duration::from_secs(5));
    let proxy = SigningProxy::spawn(slot.clone(), ipfs, dispatcher)
        .await
        .unwrap();
    (proxy, slot, signer)
}

#[tokio::test]
async fn address_reports_the_service_key() {
    let (proxy, _slot, signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();
    assert_eq!(client.address().await.unwrap(), signer.address_hex());
}

#[tokio::test]
async fn sign_roundtrip_recovers_to_proxy_address() {
    let (proxy, _slot, _signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();

    let message = "the worker signs through the proxy";
    let signed = client.sign(message).await.unwrap();
    let address = client.address().await.unwrap();

    let sig = Signature::from_raw(
        &hex::decode(signed.signature.trim_start_matches("0x")).unwrap(),
    )
    .unwrap();
    let recovered = sig.recover_address_from_msg(message.as_bytes()).unwrap();
    assert_eq!(format!("{recovered:#x}"), address);
}

#[tokio::test]
async fn sign_raw_accepts_hex_and_rejects_garbage() {
    let (proxy, _slot, _signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();

    let signed = client.sign_raw("0xdeadbeef").await.unwrap();
    assert_eq!(signed.signature.len(), 2 + 130);

    let err = client.sign_raw("0xzz").await.unwrap_err();
    assert_eq!(err.code.as_deref(), Some("VALIDATION_ERROR"));
    assert_eq!(err.status, Some(400));
}

#[tokio::test]
async fn typed_data_requires_all_four_fields() {
    let (proxy, _slot, _signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();

    let err = client
        .sign_typed_data(&json!({ "domain": {}, "types": {} }))
        .await
        .unwrap_err();
    assert_eq!(err.code.as_deref(), Some("VALIDATION_ERROR"));
}

#[tokio::test]
async fn missing_bearer_is_401_with_envelope() {
    let (proxy, _slot, _signer) = spawn_proxy().await;
    let response = reqwest::Client::new()
        .get(format!("{}/address", proxy.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["ok"], false);
    assert_eq!(body["meta"]["code"], "UNAUTHORIZED");

    let wrong = reqwest::Client::new()
        .get(format!("{}/address", proxy.url))
        .bearer_auth("not-the-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn ipfs_put_and_get_flow_through_the_proxy() {
    let (proxy, _slot, _signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();

    let stored = client.ipfs_put(&json!({ "payload": 1 })).await.unwrap();
    assert_eq!(stored.cid, KNOWN_CID);
    assert!(stored.digest_hex.starts_with("0x"));

    let content = client.ipfs_get(&stored.digest_hex).await.unwrap();
    assert_eq!(content["stored"], true);
}

#[tokio::test]
async fn dispatch_without_marketplace_is_a_validation_error() {
    let (proxy, _slot, _signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();
    let err = client
        .dispatch(&mech_proxy::dispatch::DispatchRequest {
            prompts: vec!["do the thing".into()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code.as_deref(), Some("VALIDATION_ERROR"));
}

#[tokio::test]
async fn rotation_swaps_the_identity_without_restart() {
    let (proxy, slot, _signer) = spawn_proxy().await;
    let client = ProxyClient::new(&proxy.url, &proxy.token).unwrap();
    let before = client.address().await.unwrap();

    let next_signer = Arc::new(EthSigner::from_key_bytes(&[0x43; 32]).unwrap());
    let rpc = Arc::new(RpcClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap());
    let router = Arc::new(SafeRouter::new(
        rpc,
        next_signer.clone(),
        alloy_primitives::Address::repeat_byte(0x66),
        100,
    ));
    *slot.write() = Some(ActiveIdentity {
        service_config_id: "beta".into(),
        mech: alloy_primitives::Address::repeat_byte(0xbb),
        signer: next_signer.clone(),
        router,
        marketplace: None,
    });

    let after = client.address().await.unwrap();
    assert_ne!(before, after);
    assert_eq!(after, next_signer.address_hex());
}

// --- client retry contract, against a counting stub ---

async fn spawn_counting_stub(fail_with: u16, failures: u32) -> (String, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/sign",
        post(move |Json(_): Json<Value>| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    (
                        axum::http::StatusCode::from_u16(fail_with).unwrap(),
                        Json(json!({ "meta": { "ok": false, "code": "UPSTREAM_ERROR", "message": "boom" } })),
                    )
                } else {
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({
                            "data": { "signature": "0xabc", "address": "0xdef" },
                            "meta": { "ok": true }
                        })),
                    )
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), calls)
}

#[tokio::test]
async fn client_retries_5xx_twice_then_succeeds() {
    let (url, calls) = spawn_counting_stub(502, 2).await;
    let client = ProxyClient::new(&url, "token").unwrap();
    let signed = client.sign("msg").await.unwrap();
    assert_eq!(signed.signature, "0xabc");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_gives_up_after_two_retries() {
    let (url, calls) = spawn_counting_stub(502, 10).await;
    let client = ProxyClient::new(&url, "token").unwrap();
    let err = client.sign("msg").await.unwrap_err();
    assert_eq!(err.code.as_deref(), Some("UPSTREAM_ERROR"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_never_retries_4xx() {
    let (url, calls) = spawn_counting_stub(400, 10).await;
    let client = ProxyClient::new(&url, "token").unwrap();
    let err = client.sign("msg").await.unwrap_err();
    assert_eq!(err.status, Some(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
