// Path: crates/telemetry/src/metrics.rs
//! Prometheus metrics for the worker pipeline.
//!
//! Registered once into the default registry; recording before
//! [`install_metrics`] has run is a no-op so unit tests never need the
//! global state.

use once_cell::sync::OnceCell;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

static ROTATIONS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static CLAIMS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static DELIVERIES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static RPC_RETRIES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static PROXY_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static AGENT_RUNS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// Registers all worker metrics into the default registry.
pub fn install_metrics() {
    let _ = ROTATIONS_TOTAL.set(
        register_int_counter!(
            "mech_rotations_total",
            "Number of active-service switches"
        )
        .expect("register mech_rotations_total"),
    );
    let _ = CLAIMS_TOTAL.set(
        register_int_counter_vec!(
            "mech_claims_total",
            "Claim attempts by outcome",
            &["outcome"]
        )
        .expect("register mech_claims_total"),
    );
    let _ = DELIVERIES_TOTAL.set(
        register_int_counter_vec!(
            "mech_deliveries_total",
            "Delivery attempts by terminal outcome",
            &["outcome"]
        )
        .expect("register mech_deliveries_total"),
    );
    let _ = RPC_RETRIES_TOTAL.set(
        register_int_counter_vec!(
            "mech_rpc_retries_total",
            "RPC retry attempts by pipeline stage",
            &["stage"]
        )
        .expect("register mech_rpc_retries_total"),
    );
    let _ = PROXY_REQUESTS_TOTAL.set(
        register_int_counter_vec!(
            "mech_proxy_requests_total",
            "Signing-proxy requests by route and result",
            &["route", "result"]
        )
        .expect("register mech_proxy_requests_total"),
    );
    let _ = AGENT_RUNS_TOTAL.set(
        register_int_counter_vec!(
            "mech_agent_runs_total",
            "Agent subprocess runs by final status",
            &["status"]
        )
        .expect("register mech_agent_runs_total"),
    );
}

pub fn record_rotation() {
    if let Some(c) = ROTATIONS_TOTAL.get() {
        c.inc();
    }
}

pub fn record_claim(outcome: &str) {
    if let Some(c) = CLAIMS_TOTAL.get() {
        c.with_label_values(&[outcome]).inc();
    }
}

pub fn record_delivery(outcome: &str) {
    if let Some(c) = DELIVERIES_TOTAL.get() {
        c.with_label_values(&[outcome]).inc();
    }
}

pub fn record_rpc_retry(stage: &str) {
    if let Some(c) = RPC_RETRIES_TOTAL.get() {
        c.with_label_values(&[stage]).inc();
    }
}

pub fn record_proxy_request(route: &str, result: &str) {
    if let Some(c) = PROXY_REQUESTS_TOTAL.get() {
        c.with_label_values(&[route, result]).inc();
    }
}

pub fn record_agent_run(status: &str) {
    if let Some(c) = AGENT_RUNS_TOTAL.get() {
        c.with_label_values(&[status]).inc();
    }
}
