// Path: crates/worker/src/worker.rs
//! The serialized poll loop and the rotation shim.
//!
//! One cycle: rotate (only with no delivery in flight) → probe → intake →
//! agent run → delivery → lease release. A rotation becomes visible only
//! between iterations, so no in-flight delivery ever sees the active
//! service change under it.

use crate::active::{ActiveService, ActiveServiceSlot};
use crate::capability::CapabilityProbe;
use crate::delivery::{DeliveryConfig, DeliveryEngine};
use crate::indexer::IndexerClient;
use crate::intake::{HttpLeaseBroker, IntakeOutcome, LeaseBroker, LocalLeaseBroker, RequestIntake};
use crate::monitor::ActivityMonitor;
use crate::registry::ServiceRegistry;
use crate::rotator::ServiceRotator;
use crate::runner::{AgentRunner, RuntimeContext};
use crate::tracker::TransactionTracker;
use anyhow::{Context, Result};
use mech_chain::{EthSigner, RpcClient, SafeRouter};
use mech_ipfs::IpfsStore;
use mech_proxy::dispatch::Dispatcher;
use mech_proxy::{new_identity_slot, ActiveIdentity, IdentitySlot, SigningProxy};
use mech_telemetry::StatusHandle;
use mech_types::config::WorkerConfig;
use mech_types::error::{ErrorCode, RunnerError, SignError};
use mech_types::{unix_now, DeliveryPayload, Service};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Worker {
    config: WorkerConfig,
    registry: Arc<ServiceRegistry>,
    monitor: Arc<ActivityMonitor>,
    rotator: ServiceRotator,
    tracker: Arc<TransactionTracker>,
    engine: DeliveryEngine,
    runner: AgentRunner,
    intake: Option<RequestIntake>,
    probe: RwLock<Arc<CapabilityProbe>>,
    active: ActiveServiceSlot,
    identity_slot: IdentitySlot,
    rpc: Arc<RpcClient>,
    status: StatusHandle,
    proxy_url: String,
    proxy_token: String,
}

impl Worker {
    /// Builds the whole pipeline from configuration and spawns the signing
    /// proxy. The returned proxy handle owns the server task.
    pub async fn bootstrap(
        config: WorkerConfig,
        status: StatusHandle,
    ) -> Result<(Self, SigningProxy)> {
        let rpc = Arc::new(
            RpcClient::new(
                &config.rpc_url,
                Duration::from_secs(config.rpc_timeout_secs),
            )
            .context("rpc client")?,
        );
        let ipfs = Arc::new(
            IpfsStore::new(
                &config.ipfs_api_url,
                config.ipfs_gateway_url.as_deref(),
                Duration::from_secs(config.rpc_timeout_secs),
            )
            .context("ipfs store")?,
        );

        let registry = Arc::new(ServiceRegistry::load(&config.profile_dir)?);
        let monitor = Arc::new(ActivityMonitor::new(
            rpc.clone(),
            Duration::from_secs(config.checkpoint_ttl_secs),
        ));
        let rotator = ServiceRotator::new(
            registry.clone(),
            monitor.clone(),
            Duration::from_millis(config.poll_interval_ms),
        );
        let tracker = Arc::new(TransactionTracker::new(Duration::from_secs(
            config.pending_stale_secs,
        )));

        let indexer = match &config.indexer_url {
            Some(url) => Some(Arc::new(IndexerClient::new(
                url,
                Duration::from_secs(config.rpc_timeout_secs),
            )?)),
            None => None,
        };

        let intake = match &indexer {
            Some(indexer) => {
                let broker: Arc<dyn LeaseBroker> = match &config.control_plane_url {
                    Some(url) => Arc::new(HttpLeaseBroker::new(
                        url,
                        Duration::from_secs(config.bridge_timeout_secs),
                    )?),
                    None => Arc::new(LocalLeaseBroker::default()),
                };
                Some(RequestIntake::new(
                    indexer.clone(),
                    broker,
                    &config.worker_id,
                ))
            }
            None => {
                tracing::warn!(
                    target: "worker",
                    event = "no_indexer",
                    "request intake disabled; worker will only maintain rotation"
                );
                None
            }
        };

        let engine = DeliveryEngine::new(
            rpc.clone(),
            ipfs.clone(),
            indexer,
            tracker.clone(),
            DeliveryConfig {
                receipt_deadline: Duration::from_secs(config.delivery_timeout_secs),
                ..DeliveryConfig::default()
            },
        );
        let runner = AgentRunner::new(
            config.agent_command.clone(),
            Duration::from_secs(config.agent_grace_secs),
            &config.worker_id,
        );

        let identity_slot = new_identity_slot();
        let dispatcher = Dispatcher::new(
            rpc.clone(),
            ipfs.clone(),
            Duration::from_secs(config.delivery_timeout_secs),
        );
        let proxy = SigningProxy::spawn(identity_slot.clone(), ipfs, dispatcher)
            .await
            .context("signing proxy")?;

        let probe = RwLock::new(Arc::new(CapabilityProbe::new(
            None,
            &config.github_api_url,
            config.github_token.clone(),
            Duration::from_secs(config.bridge_timeout_secs),
        )));

        let worker = Self {
            proxy_url: proxy.url.clone(),
            proxy_token: proxy.token.clone(),
            config,
            registry,
            monitor,
            rotator,
            tracker,
            engine,
            runner,
            intake,
            probe,
            active: ActiveServiceSlot::new(),
            identity_slot,
            rpc,
            status,
        };
        Ok((worker, proxy))
    }

    pub fn active_slot(&self) -> ActiveServiceSlot {
        self.active.clone()
    }

    /// The rotation shim: loads the key, rebuilds the routing and bridge
    /// clients, and publishes the new identity to every consumer.
    async fn apply_rotation(&self, service: &Service) -> Result<(), SignError> {
        let signer = Arc::new(EthSigner::load(&service.key_file)?);
        let router = Arc::new(SafeRouter::new(
            self.rpc.clone(),
            signer.clone(),
            service.safe_address,
            service.chain_id,
        ));

        self.active.set(Arc::new(ActiveService {
            service: service.clone(),
            signer: signer.clone(),
            router: router.clone(),
        }));
        *self.identity_slot.write() = Some(ActiveIdentity {
            service_config_id: service.service_config_id.clone(),
            mech: service.mech_address,
            signer: signer.clone(),
            router,
            marketplace: self.config.marketplace_address,
        });
        self.status
            .set_active_service(Some(service.service_config_id.clone()));

        // The capability cache belongs to the previous identity.
        let bridge = match &self.config.bridge_url {
            Some(url) => match mech_bridge::BridgeClient::new(
                url,
                signer,
                service.chain_id,
                Duration::from_secs(self.config.bridge_timeout_secs),
            ) {
                Ok(bridge) => Some(Arc::new(bridge)),
                Err(e) => {
                    tracing::warn!(target: "worker", event = "bridge_unavailable", error = %e);
                    None
                }
            },
            None => None,
        };
        *self.probe.write() = Arc::new(CapabilityProbe::new(
            bridge,
            &self.config.github_api_url,
            self.config.github_token.clone(),
            Duration::from_secs(self.config.bridge_timeout_secs),
        ));

        if let Some(staking) = service.staking_contract {
            match self.monitor.dashboard(staking).await {
                Ok(dashboard) => self.status.set_staking_dashboard(dashboard),
                Err(e) => {
                    tracing::debug!(target: "worker", event = "dashboard_unavailable", error = %e);
                }
            }
        }

        tracing::info!(
            target: "worker",
            event = "identity_applied",
            service = %service.service_config_id,
            mech = %service.mech_address,
        );
        Ok(())
    }

    /// Runs poll cycles until shutdown flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let decision = self.rotator.initialize().await;
        if let Some(service) = &decision.selected {
            if let Err(e) = self.apply_rotation(service).await {
                tracing::error!(target: "worker", event = "rotation_failed", error = %e);
            }
        }
        tracing::info!(
            target: "worker",
            event = "started",
            worker_id = %self.config.worker_id,
            reason = %decision.reason,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.cycle(&mut shutdown).await;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!(target: "worker", event = "stopped", worker_id = %self.config.worker_id);
    }

    async fn cycle(&self, shutdown: &mut watch::Receiver<bool>) {
        // Rotation only between cycles and never under a pending delivery.
        if self.tracker.is_empty() {
            let decision = self.rotator.reevaluate().await;
            if decision.switched {
                if let Some(service) = &decision.selected {
                    if let Err(e) = self.apply_rotation(service).await {
                        tracing::error!(target: "worker", event = "rotation_failed", error = %e);
                        return;
                    }
                }
            }
        }

        let Some(active) = self.active.get() else {
            return;
        };
        let Some(intake) = &self.intake else {
            return;
        };

        let probe = self.probe.read().clone();
        let capabilities = probe.probe().await;
        let managed = self.registry.managed_mechs();

        let claimed = match intake
            .poll_and_claim(
                active.service.mech_address,
                &managed,
                &capabilities,
                unix_now(),
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::warn!(target: "worker", event = "intake_failed", code = e.code(), error = %e);
                return;
            }
        };

        if let Some(outcome) = claimed {
            self.execute_claim(&active, intake, outcome, shutdown).await;
        }
    }

    async fn execute_claim(
        &self,
        active: &ActiveService,
        intake: &RequestIntake,
        outcome: IntakeOutcome,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let IntakeOutcome { request, lease } = outcome;
        let ctx = RuntimeContext {
            proxy_url: self.proxy_url.clone(),
            proxy_token: self.proxy_token.clone(),
            request_id: request.request_id_hex(),
            workstream_id: uuid::Uuid::new_v4().to_string(),
            blueprint: request.blueprint.clone(),
        };

        match self.runner.run(ctx, shutdown).await {
            Ok(result) => {
                let payload =
                    DeliveryPayload::from_agent_result(&request.request_id_hex(), result);
                match self.engine.deliver(active, &request, &payload).await {
                    Ok(outcome) => {
                        tracing::info!(
                            target: "worker",
                            event = "request_done",
                            request_id = %request.request_id_hex(),
                            outcome = ?outcome,
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            target: "worker",
                            event = "delivery_failed",
                            request_id = %request.request_id_hex(),
                            code = e.code(),
                            error = %e,
                        );
                    }
                }
            }
            Err(RunnerError::Interrupted) => {
                tracing::info!(
                    target: "worker",
                    event = "claim_abandoned",
                    request_id = %request.request_id_hex(),
                    reason = "shutdown",
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "worker",
                    event = "agent_failed",
                    request_id = %request.request_id_hex(),
                    code = e.code(),
                    error = %e,
                );
            }
        }

        // Terminal for this worker either way; let the fleet retry failures.
        if let Err(e) = intake.broker().release(lease.request_id).await {
            tracing::debug!(target: "worker", event = "lease_release_failed", error = %e);
        }
    }
}
