// Path: crates/node/src/bin/supervisor.rs
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

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mech_telemetry::StatusHandle;
use mech_types::config::SupervisorConfig;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

#[derive(Parser, Debug)]
#[command(name = "mech-supervisor", about = "Launches and supervises worker processes")]
struct SupervisorOpts {
    /// Path to supervisor.toml; defaults apply when the file is absent.
    #[arg(long, env = "SUPERVISOR_CONFIG", default_value = "supervisor.toml")]
    config: PathBuf,

    /// Overrides `worker_count` from the config file.
    #[arg(long, env = "WORKER_COUNT")]
    worker_count: Option<u32>,

    /// Overrides the worker binary path.
    #[arg(long, env = "WORKER_BIN")]
    worker_bin: Option<PathBuf>,
}

struct Slot {
    worker_id: String,
    telemetry_addr: String,
    child: Child,
}

fn spawn_worker(
    bin: &PathBuf,
    args: &[String],
    index: u32,
) -> Result<Slot> {
    let worker_id = format!("worker-{index}");
    // Stable per-child telemetry port, offset from the supervisor's own.
    let telemetry_addr = format!("127.0.0.1:{}", 9620 + index as u16);
    let child = Command::new(bin)
        .args(args)
        .env("WORKER_ID", &worker_id)
        .env("TELEMETRY_ADDR", &telemetry_addr)
        .stdin(Stdio::null())
        // Children log JSON to stderr; the runner already prefixes agent
        // lines, so pass both streams straight through.
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("spawning {}", bin.display()))?;
    tracing::info!(
        target: "supervisor",
        event = "worker_spawned",
        worker_id = %worker_id,
        pid = child.id().unwrap_or(0),
    );
    Ok(Slot {
        worker_id,
        telemetry_addr,
        child,
    })
}

fn terminate_fleet(slots: &mut [Slot], grace: Duration) {
    for slot in slots.iter() {
        if let Some(pid) = slot.child.id() {
            // SAFETY: kill(2) on child pids this process owns.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    std::thread::sleep(grace);
    for slot in slots.iter_mut() {
        let _ = slot.child.start_kill();
    }
}

fn publish_fleet(status: &StatusHandle, slots: &[Slot]) {
    let children: Vec<_> = slots
        .iter()
        .map(|s| {
            json!({
                "worker_id": s.worker_id,
                "pid": s.child.id(),
                "telemetry_addr": s.telemetry_addr,
            })
        })
        .collect();
    status.set_extra(json!({ "children": children }));
}

#[tokio::main]
async fn main() -> Result<()> {
    mech_telemetry::init::init_tracing()?;

    let opts = SupervisorOpts::parse();
    let mut config: SupervisorConfig = match std::fs::read_to_string(&opts.config) {
        Ok(raw) => toml::from_str(&raw)
            .with_context(|| format!("parsing {}", opts.config.display()))?,
        Err(_) => toml::from_str("").map_err(|e| anyhow!("default config: {e}"))?,
    };
    if let Some(count) = opts.worker_count {
        config.worker_count = count;
    }
    if let Some(bin) = &opts.worker_bin {
        config.worker_bin = Some(bin.clone());
    }

    let worker_bin = match &config.worker_bin {
        Some(bin) => bin.clone(),
        None => {
            // Default to the sibling worker binary.
            let exe = std::env::current_exe().context("current_exe")?;
            exe.parent()
                .ok_or_else(|| anyhow!("no parent dir for {}", exe.display()))?
                .join("mech-workerd")
        }
    };
    let grace = Duration::from_secs(config.shutdown_grace_secs);

    let status = StatusHandle::new("supervisor");
    let liveness_addr = config
        .liveness_addr
        .parse()
        .context("parsing liveness_addr")?;
    tokio::spawn(mech_telemetry::http::run_server(
        liveness_addr,
        status.clone(),
    ));

    if config.worker_count == 0 {
        return Err(anyhow!("worker_count must be at least 1"));
    }
    tracing::info!(
        target: "supervisor",
        event = "startup",
        worker_count = config.worker_count,
        worker_bin = %worker_bin.display(),
    );

    let mut slots = Vec::new();
    for index in 0..config.worker_count {
        slots.push(spawn_worker(&worker_bin, &config.worker_args, index)?);
    }
    publish_fleet(&status, &slots);

    loop {
        // Wait for the first child to exit, or for ctrl-c.
        let waits = slots
            .iter_mut()
            .map(|s| Box::pin(s.child.wait()))
            .collect::<Vec<_>>();

        enum Event {
            WorkerExited {
                status_code: std::process::ExitStatus,
                index: usize,
            },
            CtrlC,
        }

        let event = tokio::select! {
            (result, index, _) = futures_select_all(waits) => {
                let status_code = result
                    .map_err(|e| anyhow!("waitpid failed: {e}"))?;
                Event::WorkerExited { status_code, index }
            }
            _ = tokio::signal::ctrl_c() => Event::CtrlC,
        };

        match event {
            Event::WorkerExited { status_code, index } => {
                let worker_id = slots[index].worker_id.clone();

                if status_code.success() {
                    tracing::info!(
                        target: "supervisor",
                        event = "worker_clean_exit",
                        worker_id = %worker_id,
                    );
                    // Clean exits are restarted to keep the fleet at size.
                    let replacement =
                        spawn_worker(&worker_bin, &config.worker_args, index as u32)?;
                    slots[index] = replacement;
                    publish_fleet(&status, &slots);
                    continue;
                }

                let code = status_code.code().unwrap_or(1);
                tracing::error!(
                    target: "supervisor",
                    event = "worker_failed",
                    worker_id = %worker_id,
                    code,
                );
                slots.remove(index);
                terminate_fleet(&mut slots, grace);
                std::process::exit(code);
            }
            Event::CtrlC => {
                tracing::info!(target: "supervisor", event = "shutdown", reason = "ctrl-c");
                terminate_fleet(&mut slots, grace);
                return Ok(());
            }
        }
    }
}

/// `futures::future::select_all` without pulling the combinator into scope
/// at the call site; keeps the select! arm readable.
async fn futures_select_all<F, T>(futures: Vec<F>) -> (T, usize, Vec<F>)
where
    F: std::future::Future<Output = T> + Unpin,
{
    futures::future::select_all(futures).await
}
