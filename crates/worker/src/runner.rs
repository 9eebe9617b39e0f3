// Path: crates/worker/src/runner.rs
//! Spawns the agent subprocess and collects its result.
//!
//! The agent is external and language-neutral: it gets the signing-proxy
//! URL + bearer token, the request id, a workstream id, and the blueprint
//! through its environment, and writes its result JSON to the path named by
//! `AGENT_RESULT_PATH`. Stdout/stderr lines are re-logged with a worker
//! prefix for the supervisor's aggregated log.

use mech_telemetry::metrics;
use mech_types::error::RunnerError;
use mech_types::AgentResult;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

/// Everything the agent needs to execute one request.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub proxy_url: String,
    pub proxy_token: String,
    pub request_id: String,
    pub workstream_id: String,
    pub blueprint: String,
}

pub struct AgentRunner {
    command: Vec<String>,
    grace: Duration,
    worker_id: String,
}

impl AgentRunner {
    pub fn new(command: Vec<String>, grace: Duration, worker_id: &str) -> Self {
        Self {
            command,
            grace,
            worker_id: worker_id.to_string(),
        }
    }

    /// Runs the agent to completion, or interrupts it when `shutdown`
    /// flips. Interrupt escalation: SIGINT, bounded grace, SIGKILL.
    pub async fn run(
        &self,
        ctx: RuntimeContext,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<AgentResult, RunnerError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| RunnerError::Spawn("agent command is empty".to_string()))?;

        let scratch = tempfile::tempdir().map_err(|e| RunnerError::Io(e.to_string()))?;
        let blueprint_path = scratch.path().join("blueprint.md");
        let result_path = scratch.path().join("result.json");
        std::fs::write(&blueprint_path, &ctx.blueprint)
            .map_err(|e| RunnerError::Io(e.to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .env("SIGNING_PROXY_URL", &ctx.proxy_url)
            .env("SIGNING_PROXY_TOKEN", &ctx.proxy_token)
            .env("REQUEST_ID", &ctx.request_id)
            .env("WORKSTREAM_ID", &ctx.workstream_id)
            .env("AGENT_BLUEPRINT_PATH", &blueprint_path)
            .env("AGENT_RESULT_PATH", &result_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;

        let prefix = format!("[{}/agent]", self.worker_id);
        if let Some(stdout) = child.stdout.take() {
            let prefix = prefix.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "agent", "{prefix} {line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let prefix = prefix.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "agent", "{prefix} {line}");
                }
            });
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| RunnerError::Io(e.to_string()))?,
            _ = wait_for_shutdown(shutdown) => {
                return self.interrupt(child).await;
            }
        };

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            metrics::record_agent_run("nonzero_exit");
            return Err(RunnerError::NonZeroExit(code));
        }

        let raw = std::fs::read_to_string(&result_path)
            .map_err(|e| RunnerError::BadResult(format!("result file missing: {e}")))?;
        let result: AgentResult = serde_json::from_str(&raw)
            .map_err(|e| RunnerError::BadResult(format!("result not parseable: {e}")))?;
        metrics::record_agent_run("completed");
        tracing::info!(
            target: "agent",
            event = "finished",
            request_id = %ctx.request_id,
            final_status = ?result.final_status,
            artifacts = result.artifacts.len(),
        );
        Ok(result)
    }

    /// SIGINT, then a bounded grace period, then SIGKILL.
    async fn interrupt(&self, mut child: tokio::process::Child) -> Result<AgentResult, RunnerError> {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a child pid this process owns.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGINT);
            }
        }
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => {
                tracing::info!(target: "agent", event = "interrupted", grace = "honored");
            }
            Err(_) => {
                tracing::warn!(target: "agent", event = "killed", grace_secs = self.grace.as_secs());
                let _ = child.kill().await;
            }
        }
        metrics::record_agent_run("interrupted");
        Err(RunnerError::Interrupted)
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender dropped: treat as shutdown.
            return;
        }
    }
}
