//! Scheduler: the single-writer loop matching queued jobs to workers.
//!
//! One task owns the whole claim -> match -> reserve -> dispatch path, so
//! there is never a second writer to argue with. Wake-ups arrive over a
//! bounded channel (job arrivals, heartbeats, capacity releases) and a 1 s
//! cap on the idle sleep bounds how stale a missed wake-up can make us.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::jobs::JobStore;
use crate::lifecycle::ExecutionLifecycle;
use crate::models::{Job, Pool};
use crate::pools::PoolManager;
use crate::registry::{WorkerRegistry, WorkerSession};
use crate::transport::{Outbound, WorkerTransport};
use chrono::Utc;
use hodei_ids::PoolId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Wake handle for the scheduler loop. The channel is bounded at one slot:
/// a wake-up is a level, not an edge, so coalescing is correct and nobody
/// busy-spins.
#[derive(Clone)]
pub struct SchedulerWake {
    tx: mpsc::Sender<()>,
}

impl SchedulerWake {
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

pub fn wake_channel() -> (SchedulerWake, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (SchedulerWake { tx }, rx)
}

pub struct Scheduler {
    config: OrchestratorConfig,
    jobs: Arc<JobStore>,
    pools: Arc<PoolManager>,
    registry: Arc<WorkerRegistry>,
    lifecycle: Arc<ExecutionLifecycle>,
    transport: Arc<WorkerTransport>,
    outbound: Arc<Outbound>,
    wake_rx: mpsc::Receiver<()>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        jobs: Arc<JobStore>,
        pools: Arc<PoolManager>,
        registry: Arc<WorkerRegistry>,
        lifecycle: Arc<ExecutionLifecycle>,
        transport: Arc<WorkerTransport>,
        outbound: Arc<Outbound>,
        wake_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            config,
            jobs,
            pools,
            registry,
            lifecycle,
            transport,
            outbound,
            wake_rx,
        }
    }

    /// Main loop. A failed tick is logged and re-entered; nothing here may
    /// take the orchestrator down.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopping");
                        return;
                    }
                }
                _ = self.wake_rx.recv() => {}
                _ = tokio::time::sleep(self.config.scheduler_max_sleep) => {}
            }

            if let Err(err) = self.tick().await {
                error!("Scheduler tick failed: {}", err);
            }
        }
    }

    /// One dispatch pass: keep placing jobs until the head of the queue has
    /// no home, then go back to sleep.
    pub async fn tick(&self) -> Result<()> {
        loop {
            let now = Utc::now();
            let queue = self.jobs.ranked_queue();

            // Highest-ranked job that is past its retry gate and inside its
            // namespace's fairness window. Fairness-limited jobs are skipped
            // this tick, not reordered.
            let Some(candidate) = queue.into_iter().find(|job| {
                job.dispatchable_at(now) && self.pools.fairness_allows(&job.definition.namespace)
            }) else {
                return Ok(());
            };

            let job = match self.jobs.claim(&candidate.id).await {
                Ok(job) => job,
                Err(OrchestratorError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            };

            match self.find_match(&job) {
                Ok(Some((pool_id, worker))) => {
                    if let Err(err) = self.dispatch(&job, pool_id, worker).await {
                        // The job must not stay PENDING with nothing in
                        // flight, whatever went wrong.
                        self.jobs.release_claim(&job.id).await?;
                        if err.is_recoverable() {
                            debug!("Dispatch of {} deferred: {}", job.id, err);
                            return Ok(());
                        }
                        return Err(err);
                    }
                }
                Ok(None) => {
                    // Head-of-line: nothing fits the best-ranked job, so we
                    // wait rather than let lower-ranked work jump it.
                    self.jobs.release_claim(&job.id).await?;
                    return Ok(());
                }
                Err(err) if err.is_recoverable() => {
                    debug!("Job {} stays queued: {}", job.id, err);
                    self.jobs.release_claim(&job.id).await?;
                    return Ok(());
                }
                Err(err) => {
                    self.jobs.release_claim(&job.id).await?;
                    return Err(err);
                }
            }
        }
    }

    /// Pick a (pool, worker) for the job, or None when nothing fits.
    /// Quota denial under ENFORCE surfaces as a recoverable error so the job
    /// stays queued.
    fn find_match(&self, job: &Job) -> Result<Option<(PoolId, WorkerSession)>> {
        self.pools
            .admit(&job.definition.namespace, &job.definition.resources)?;

        let mut best: Option<(Pool, Vec<WorkerSession>)> = None;
        for pool in self.pools.schedulable() {
            if !job
                .definition
                .resources
                .fits_within(&pool.capacity.available())
            {
                continue;
            }
            let fitting: Vec<WorkerSession> = self
                .registry
                .idle_in_pool(&pool.id)
                .into_iter()
                .filter(|worker| {
                    worker.satisfies(&job.definition.required_capabilities)
                        && job.definition.resources.fits_within(&worker.resources)
                        && self.outbound.has_capacity(&worker.worker_id)
                })
                .collect();
            if fitting.is_empty() {
                continue;
            }
            let better = match &best {
                None => true,
                Some((current, _)) => {
                    pool.capacity.free_score() > current.capacity.free_score()
                }
            };
            if better {
                best = Some((pool, fitting));
            }
        }

        Ok(best.map(|(pool, workers)| {
            let worker = pick_worker(workers).expect("candidate pool always has workers");
            (pool.id, worker)
        }))
    }

    /// Reserve, create the execution, and hand off to the transport. Any
    /// failure unwinds the reservations it already made.
    async fn dispatch(&self, job: &Job, pool_id: PoolId, worker: WorkerSession) -> Result<()> {
        let resources = job.definition.resources;
        let namespace = job.definition.namespace.clone();

        self.pools.reserve_capacity(&pool_id, &resources).await?;
        if let Err(err) = self.pools.reserve_quota(&namespace, &resources).await {
            self.pools.release_capacity(&pool_id, &resources).await?;
            return Err(err);
        }

        let execution = match self
            .lifecycle
            .create_execution(job, pool_id.clone(), worker.worker_id.clone())
            .await
        {
            Ok(execution) => execution,
            Err(err) => {
                self.pools.release_capacity(&pool_id, &resources).await?;
                self.pools.release_quota(&namespace, &resources).await?;
                return Err(err);
            }
        };

        if let Err(err) = self
            .registry
            .mark_busy(&worker.worker_id, execution.id.clone())
        {
            warn!(
                "Worker {} vanished between match and dispatch: {}",
                worker.worker_id, err
            );
            self.lifecycle
                .fail_execution(
                    &execution.id,
                    "WorkerDisconnected",
                    "worker lost before dispatch",
                )
                .await?;
            return Ok(());
        }

        info!(
            "Scheduling job '{}' as execution {} on worker {}",
            job.definition.name, execution.id, worker.worker_id
        );
        self.transport.begin_dispatch(execution, job.clone());
        Ok(())
    }
}

/// Age-based load balancing: the worker with the earliest last heartbeat has
/// been idle the longest.
fn pick_worker(workers: Vec<WorkerSession>) -> Option<WorkerSession> {
    workers.into_iter().min_by_key(|w| w.last_heartbeat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_ids::{SessionToken, WorkerId};
    use hodei_protocol::{ResourceSpec, WorkerStatus};
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    fn session(age: Duration) -> WorkerSession {
        WorkerSession {
            worker_id: WorkerId::new(),
            name: "w".to_string(),
            pool_id: PoolId::new(),
            status: WorkerStatus::Idle,
            capabilities: HashMap::new(),
            resources: ResourceSpec::ZERO,
            current_execution: None,
            session_token: SessionToken::mint(),
            last_heartbeat: Instant::now() - age,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_pick_worker_prefers_longest_idle() {
        let young = session(Duration::from_secs(1));
        let old = session(Duration::from_secs(30));
        let old_id = old.worker_id.clone();

        let picked = pick_worker(vec![young, old]).unwrap();
        assert_eq!(picked.worker_id, old_id);
    }

    #[test]
    fn test_pick_worker_empty() {
        assert!(pick_worker(vec![]).is_none());
    }

    #[test]
    fn test_wake_channel_coalesces() {
        let (wake, mut rx) = wake_channel();
        wake.notify();
        wake.notify();
        wake.notify();

        assert!(rx.try_recv().is_ok());
        // Extra notifications were coalesced into the single slot.
        assert!(rx.try_recv().is_err());
    }
}
