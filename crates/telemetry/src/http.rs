// Path: crates/telemetry/src/http.rs
use crate::status::StatusHandle;
use axum::{
    body::Bytes,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderName, StatusCode},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tokio::signal;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

async fn metrics_handler() -> ([(HeaderName, String); 1], Bytes) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::with_capacity(1 << 16);
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(error = %e, "Failed to encode prometheus metrics");
    }
    (
        [(CONTENT_TYPE, encoder.format_type().to_string())],
        buf.into(),
    )
}

async fn healthz_handler() -> &'static str {
    "OK"
}

async fn status_handler(State(handle): State<StatusHandle>) -> Json<serde_json::Value> {
    Json(handle.snapshot())
}

async fn handle_service_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "Request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", err),
        )
    }
}

fn router(handle: StatusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
        .with_state(handle)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_service_error))
                .layer(TraceLayer::new_for_http())
                .load_shed()
                .concurrency_limit(8)
                .timeout(Duration::from_secs(2)),
        )
}

/// Binds the liveness server; returns the bound address and a future that
/// serves until ctrl-c.
pub async fn bind(
    addr: SocketAddr,
    handle: StatusHandle,
) -> std::io::Result<(SocketAddr, impl std::future::Future<Output = ()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let serve = async move {
        tracing::info!(target: "telemetry", addr = %local, "listening");
        let graceful =
            axum::serve(listener, router(handle).into_make_service()).with_graceful_shutdown(
                async {
                    if let Err(e) = signal::ctrl_c().await {
                        tracing::error!(target: "telemetry", error = %e, "Failed to install CTRL+C handler");
                    }
                    tracing::info!(target: "telemetry", "shutting down gracefully");
                },
            );
        if let Err(e) = graceful.await {
            tracing::error!(target: "telemetry", error = %e, "server error");
        }
    };
    Ok((local, serve))
}

/// Binds and serves in one call; logs instead of failing on bind errors so
/// a port clash never takes the worker down.
pub async fn run_server(addr: SocketAddr, handle: StatusHandle) {
    match bind(addr, handle).await {
        Ok((_, serve)) => serve.await,
        Err(e) => {
            tracing::error!(target: "telemetry", error = %e, "Failed to bind telemetry http server");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_and_status_respond() {
        let handle = StatusHandle::new("worker-7");
        handle.set_active_service(Some("alpha".into()));
        let (addr, serve) = bind("127.0.0.1:0".parse().unwrap(), handle)
            .await
            .unwrap();
        tokio::spawn(serve);

        let ok: String = reqwest::get(format!("http://{addr}/healthz"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(ok, "OK");

        let status: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["process_id"], "worker-7");
        assert_eq!(status["active_service"], "alpha");

        let metrics = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap();
        assert!(metrics.status().is_success());
    }
}
