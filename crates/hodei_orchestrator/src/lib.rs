//! Hodei orchestrator control plane.
//!
//! Composition lives here: `Orchestrator::build` wires the registries,
//! stores, transport, and scheduler together over a repository; `run` drives
//! the long-lived tasks (scheduler loop, liveness sweep, ROUTER transport,
//! control API) until shutdown.

pub mod config;
pub mod control;
pub mod control_client;
pub mod error;
pub mod events;
pub mod facade;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod pools;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use config::OrchestratorConfig;
pub use control_client::ControlClient;
pub use error::{OrchestratorError, Result};
pub use facade::CoreFacade;

use crate::events::EventBus;
use crate::jobs::JobStore;
use crate::lifecycle::ExecutionLifecycle;
use crate::models::{Event, EventKind};
use crate::pools::{LocalProvisioner, PoolManager, Provisioner};
use crate::registry::WorkerRegistry;
use crate::scheduler::{wake_channel, Scheduler, SchedulerWake};
use crate::transport::{Outbound, WorkerTransport};
use hodei_cache::ArtifactStore;
use hodei_state::Repository;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// A fully wired control plane. Tests drive the pieces directly; the binary
/// calls `run`.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub facade: Arc<CoreFacade>,
    pub transport: Arc<WorkerTransport>,
    pub registry: Arc<WorkerRegistry>,
    pub jobs: Arc<JobStore>,
    pub pools: Arc<PoolManager>,
    pub lifecycle: Arc<ExecutionLifecycle>,
    pub outbound: Arc<Outbound>,
    pub events: Arc<EventBus>,
    pub wake: SchedulerWake,
    scheduler: Option<Scheduler>,
}

impl Orchestrator {
    /// Wire everything over the given repository and load persisted state.
    pub async fn build(config: OrchestratorConfig, repo: Arc<dyn Repository>) -> Result<Self> {
        Self::build_with_provisioner(config, repo, Arc::new(LocalProvisioner)).await
    }

    pub async fn build_with_provisioner(
        config: OrchestratorConfig,
        repo: Arc<dyn Repository>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Self> {
        let events = Arc::new(EventBus::new());
        let cache = Arc::new(ArtifactStore::open(&config.cache_dir)?);
        let outbound = Arc::new(Outbound::new(config.send_buffer_messages));
        let (wake, wake_rx) = wake_channel();

        let jobs = Arc::new(JobStore::new(Arc::clone(&repo), Arc::clone(&events)));
        let pools = Arc::new(PoolManager::new(
            Arc::clone(&repo),
            Arc::clone(&events),
            provisioner,
        ));
        let registry = Arc::new(WorkerRegistry::new(Arc::clone(&events)));
        let lifecycle = Arc::new(ExecutionLifecycle::new(
            config.clone(),
            Arc::clone(&repo),
            Arc::clone(&jobs),
            Arc::clone(&pools),
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&outbound),
        ));
        let transport = Arc::new(WorkerTransport::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            Arc::clone(&pools),
            Arc::clone(&cache),
            Arc::clone(&outbound),
            wake.clone(),
        ));
        let facade = Arc::new(CoreFacade::new(
            Arc::clone(&repo),
            Arc::clone(&jobs),
            Arc::clone(&lifecycle),
            Arc::clone(&pools),
            Arc::clone(&registry),
            Arc::clone(&transport),
            Arc::clone(&cache),
            Arc::clone(&events),
            wake.clone(),
        ));
        let scheduler = Scheduler::new(
            config.clone(),
            Arc::clone(&jobs),
            Arc::clone(&pools),
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            Arc::clone(&transport),
            Arc::clone(&outbound),
            wake_rx,
        );

        let loaded_jobs = jobs.load_from_repo().await?;
        let loaded_pools = pools.load_from_repo().await?;
        let loaded_executions = lifecycle.load_from_repo().await?;
        info!(
            "State loaded: {} jobs, {} pools/quotas, {} executions",
            loaded_jobs, loaded_pools, loaded_executions
        );

        events.publish(Event::new(EventKind::SystemStarted));
        Ok(Self {
            config,
            facade,
            transport,
            registry,
            jobs,
            pools,
            lifecycle,
            outbound,
            events,
            wake,
            scheduler: Some(scheduler),
        })
    }

    /// Take ownership of the scheduler loop (tests drive ticks directly).
    pub fn take_scheduler(&mut self) -> Option<Scheduler> {
        self.scheduler.take()
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let scheduler = self
            .scheduler
            .take()
            .expect("run called twice on the same orchestrator");

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(scheduler.run(shutdown.clone())));
        tasks.push(tokio::spawn(run_liveness_sweep(
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.pools),
            Arc::clone(&self.outbound),
            shutdown.clone(),
        )));

        if let Some(control_addr) = self.config.control_addr.clone() {
            let facade = Arc::clone(&self.facade);
            let control_shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) =
                    control::run_control_api(facade, &control_addr, control_shutdown).await
                {
                    error!("Control API failed: {}", err);
                }
            }));
        }

        let router_result = transport::run_router(
            Arc::clone(&self.transport),
            &self.config.bind_addr,
            shutdown,
        )
        .await;

        for task in tasks {
            task.abort();
        }
        router_result
    }
}

/// Background liveness sweep: every `heartbeat_interval / 2`, workers silent
/// for `3 x heartbeat_interval` are marked ERROR, their executions failed
/// with `WorkerDisconnected`, and their resources detached from the pool.
pub async fn run_liveness_sweep(
    config: OrchestratorConfig,
    registry: Arc<WorkerRegistry>,
    lifecycle: Arc<ExecutionLifecycle>,
    pools: Arc<PoolManager>,
    outbound: Arc<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {}
        }

        let expired = registry.expire_stale(config.worker_timeout());
        for session in expired {
            warn!(
                "Worker [{}] lost; failing its executions and releasing capacity",
                session.name
            );
            lifecycle
                .handle_worker_lost(&session.worker_id, "worker missed heartbeats")
                .await;
            if let Err(err) = pools
                .detach_worker(&session.pool_id, &session.resources)
                .await
            {
                error!("Failed to detach lost worker from pool: {}", err);
            }
            outbound.detach(&session.worker_id);
        }
    }
}
