// Path: crates/node/src/bin/workerd.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

use anyhow::{Context, Result};
use clap::Parser;
use mech_telemetry::StatusHandle;
use mech_types::config::WorkerConfig;
use mech_worker::Worker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "mech-workerd", about = "Mech marketplace worker process")]
struct WorkerOpts {
    /// Path to worker.toml.
    #[arg(long, env = "WORKER_CONFIG", default_value = "worker.toml")]
    config: PathBuf,

    /// Overrides `rpc_url` from the config file.
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,

    /// Overrides `chain_id` from the config file.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    /// Overrides `profile_dir` from the config file.
    #[arg(long, env = "SERVICE_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    #[arg(long, env = "INDEXER_URL")]
    indexer_url: Option<String>,

    #[arg(long, env = "CREDENTIAL_BRIDGE_URL")]
    bridge_url: Option<String>,

    #[arg(long, env = "GITHUB_API_URL")]
    github_api_url: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Stable identity of this worker within the fleet.
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Liveness/metrics endpoint bind address.
    #[arg(long, env = "TELEMETRY_ADDR", default_value = "127.0.0.1:9614")]
    telemetry_addr: String,
}

fn apply_overrides(config: &mut WorkerConfig, opts: &WorkerOpts) {
    if let Some(v) = &opts.rpc_url {
        config.rpc_url = v.clone();
    }
    if let Some(v) = opts.chain_id {
        config.chain_id = v;
    }
    if let Some(v) = &opts.profile_dir {
        config.profile_dir = v.clone();
    }
    if let Some(v) = &opts.indexer_url {
        config.indexer_url = Some(v.clone());
    }
    if let Some(v) = &opts.bridge_url {
        config.bridge_url = Some(v.clone());
    }
    if let Some(v) = &opts.github_api_url {
        config.github_api_url = v.clone();
    }
    if let Some(v) = &opts.github_token {
        config.github_token = Some(v.clone());
    }
    if let Some(v) = &opts.worker_id {
        config.worker_id = v.clone();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    mech_telemetry::init::init_tracing()?;
    mech_telemetry::metrics::install_metrics();

    let opts = WorkerOpts::parse();
    let mut config: WorkerConfig = toml::from_str(
        &std::fs::read_to_string(&opts.config)
            .with_context(|| format!("reading {}", opts.config.display()))?,
    )
    .with_context(|| format!("parsing {}", opts.config.display()))?;
    apply_overrides(&mut config, &opts);

    tracing::info!(
        target: "workerd",
        event = "startup",
        worker_id = %config.worker_id,
        chain_id = config.chain_id,
    );

    let status = StatusHandle::new(&config.worker_id);
    let telemetry_addr = opts
        .telemetry_addr
        .parse()
        .context("parsing TELEMETRY_ADDR")?;
    tokio::spawn(mech_telemetry::http::run_server(
        telemetry_addr,
        status.clone(),
    ));

    let (worker, proxy) = Worker::bootstrap(config, status).await?;
    tracing::info!(target: "workerd", event = "proxy_ready", url = %proxy.url);

    let worker = Arc::new(worker);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "workerd", event = "shutdown", reason = "ctrl-c");
    let _ = shutdown_tx.send(true);

    // The runner's interrupt-grace bounds how long this can take.
    run.await?;
    proxy.abort();
    tracing::info!(target: "workerd", event = "shutdown", reason = "complete");
    Ok(())
}
