// Path: crates/chain/tests/rpc_client.rs
//! RPC client behavior against an in-process JSON-RPC node.

use alloy_primitives::{address, U256};
use axum::{routing::post, Json, Router};
use mech_chain::contracts::IStaking;
use mech_chain::RpcClient;
use mech_types::error::{ErrorCode, RpcError};
use serde_json::{json, Value};
use std::time::Duration;

/// Starts a one-route JSON-RPC node whose behavior is driven by `handler`.
async fn spawn_node(handler: fn(&str, &Value) -> Value) -> String {
    let app = Router::new().route(
        "/",
        post(move |Json(body): Json<Value>| async move {
            let method = body["method"].as_str().unwrap_or_default().to_string();
            let id = body["id"].clone();
            let mut reply = handler(&method, &body["params"]);
            reply["jsonrpc"] = json!("2.0");
            reply["id"] = id;
            Json(reply)
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
async fn eth_call_decodes_uint_return() {
    let url = spawn_node(|method, _| match method {
        // livenessPeriod() -> 86400, ABI-encoded as one word
        "eth_call" => json!({
            "result": format!("0x{:064x}", 86_400u64)
        }),
        _ => json!({ "error": { "code": -32601, "message": "method not found" } }),
    })
    .await;

    let client = RpcClient::new(&url, Duration::from_secs(5)).unwrap();
    let period: U256 = client
        .call(
            address!("2ef503950be67a98746f484da0bbada339df3326"),
            IStaking::livenessPeriodCall {},
        )
        .await
        .unwrap();
    assert_eq!(period, U256::from(86_400u64));
}

#[tokio::test]
async fn remote_error_surfaces_code_and_message() {
    let url = spawn_node(|_, _| {
        json!({ "error": { "code": -32000, "message": "nonce too low" } })
    })
    .await;

    let client = RpcClient::new(&url, Duration::from_secs(5)).unwrap();
    let err = client
        .transaction_count(
            address!("2ef503950be67a98746f484da0bbada339df3326"),
            "pending",
        )
        .await
        .unwrap_err();
    match &err {
        RpcError::Remote { code, message } => {
            assert_eq!(*code, -32000);
            assert!(message.contains("nonce too low"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(err.code(), "RPC_REMOTE_ERROR");
}

#[tokio::test]
async fn null_receipt_means_unmined() {
    let url = spawn_node(|method, _| match method {
        "eth_getTransactionReceipt" => json!({ "result": null }),
        _ => json!({ "error": { "code": -32601, "message": "method not found" } }),
    })
    .await;

    let client = RpcClient::new(&url, Duration::from_secs(5)).unwrap();
    let receipt = client
        .transaction_receipt(alloy_primitives::B256::repeat_byte(7))
        .await
        .unwrap();
    assert!(receipt.is_none());
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
    // Port 9 is discard; nothing is listening on this address in tests.
    let client = RpcClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = client.gas_price().await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::Transport(_) | RpcError::Timeout(_)
    ));
}
