//! Public core facade: the operations REST/CLI adapters consume.
//!
//! Thin coordination over the owning components; no business rules live here
//! beyond multi-component choreography (cancel fan-out, drain timers,
//! template expansion).

use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::jobs::{CancelOutcome, JobStore};
use crate::lifecycle::{ExecutionLifecycle, LogEntry};
use crate::models::{
    Event, Execution, Job, JobDefinition, JobTemplate, Pool, Quota, QuotaLimits,
};
use crate::pools::PoolManager;
use crate::registry::{WorkerRegistry, WorkerSession};
use crate::scheduler::SchedulerWake;
use crate::transport::WorkerTransport;
use chrono::{DateTime, Utc};
use hodei_cache::ArtifactStore;
use hodei_ids::{ExecutionId, JobId, PoolId, TemplateId, WorkerId};
use hodei_protocol::{ExecutionStatus, JobStatus, PoolKind, QuotaPolicyMode};
use hodei_state::{save_entity, Entity, Repository};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct CoreFacade {
    repo: Arc<dyn Repository>,
    jobs: Arc<JobStore>,
    lifecycle: Arc<ExecutionLifecycle>,
    pools: Arc<PoolManager>,
    registry: Arc<WorkerRegistry>,
    transport: Arc<WorkerTransport>,
    cache: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    wake: SchedulerWake,
}

/// Queue statistics for API consumers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl CoreFacade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn Repository>,
        jobs: Arc<JobStore>,
        lifecycle: Arc<ExecutionLifecycle>,
        pools: Arc<PoolManager>,
        registry: Arc<WorkerRegistry>,
        transport: Arc<WorkerTransport>,
        cache: Arc<ArtifactStore>,
        events: Arc<EventBus>,
        wake: SchedulerWake,
    ) -> Self {
        Self {
            repo,
            jobs,
            lifecycle,
            pools,
            registry,
            transport,
            cache,
            events,
            wake,
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    pub async fn submit_job(&self, definition: JobDefinition) -> Result<Job> {
        let job = self.jobs.submit(definition).await?;
        self.wake.notify();
        Ok(job)
    }

    /// Submit a job from a stored template, with optional name and parameter
    /// overrides merged over the template's definition.
    pub async fn submit_from_template(
        &self,
        template_id: &TemplateId,
        name: Option<String>,
        parameters: HashMap<String, String>,
    ) -> Result<Job> {
        let body = self
            .repo
            .load(<JobTemplate as Entity>::KIND, template_id.as_str())
            .await?
            .ok_or_else(|| OrchestratorError::not_found("template", template_id.to_string()))?;
        let template: JobTemplate = serde_json::from_value(body)
            .map_err(|e| OrchestratorError::internal(format!("corrupt template: {e}")))?;

        let mut definition = template.definition;
        definition.template_id = Some(template_id.clone());
        if let Some(name) = name {
            definition.name = name;
        }
        definition.parameters.extend(parameters);
        self.submit_job(definition).await
    }

    pub async fn save_template(&self, name: &str, definition: JobDefinition) -> Result<JobTemplate> {
        let template = JobTemplate {
            id: TemplateId::new(),
            name: name.to_string(),
            definition,
            created_at: Utc::now(),
        };
        save_entity(self.repo.as_ref(), &template).await?;
        Ok(template)
    }

    pub fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))
    }

    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> Vec<Job> {
        self.jobs.list(status, limit, offset)
    }

    /// Cancel a job. Queued jobs cancel in place; running jobs fan out to
    /// their live executions. Idempotent on terminal jobs.
    pub async fn cancel_job(&self, job_id: &JobId, reason: &str, force: bool) -> Result<JobStatus> {
        match self.jobs.cancel(job_id, reason).await? {
            CancelOutcome::Cancelled => {
                // A dispatch may have been in flight while the job was still
                // PENDING; sweep up any live execution it created.
                self.cancel_live_executions(job_id, reason, force).await?;
                Ok(JobStatus::Cancelled)
            }
            CancelOutcome::AlreadyTerminal(status) => Ok(status),
            CancelOutcome::RunningPropagate => {
                self.cancel_live_executions(job_id, reason, force).await?;
                Ok(self.get_job(job_id)?.status)
            }
        }
    }

    async fn cancel_live_executions(
        &self,
        job_id: &JobId,
        reason: &str,
        force: bool,
    ) -> Result<()> {
        let live: Vec<ExecutionId> = self
            .lifecycle
            .list(Some(job_id))
            .into_iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.id)
            .collect();
        for execution_id in live {
            Arc::clone(&self.lifecycle)
                .cancel_execution(&execution_id, reason, force)
                .await?;
        }
        Ok(())
    }

    /// Retry a terminal job by resubmitting its definition as a new job.
    /// Terminal states stay final; the retry is a fresh submission that
    /// records where it came from.
    pub async fn retry_job(&self, job_id: &JobId) -> Result<Job> {
        let job = self.get_job(job_id)?;
        if !job.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!(
                "job {} is {}, only terminal jobs can be retried",
                job_id, job.status
            )));
        }
        let definition = job.definition.clone();
        let retried = self.submit_job(definition).await?;
        info!("Job {} retried as {}", job_id, retried.id);
        Ok(retried)
    }

    pub fn queue_stats(&self) -> QueueStats {
        let counts = self.jobs.counts_by_status();
        let get = |s: JobStatus| counts.get(&s).copied().unwrap_or(0);
        QueueStats {
            queued: get(JobStatus::Queued),
            pending: get(JobStatus::Pending),
            running: get(JobStatus::Running),
            completed: get(JobStatus::Completed),
            failed: get(JobStatus::Failed),
            cancelled: get(JobStatus::Cancelled),
            total: counts.values().sum(),
        }
    }

    // ========================================================================
    // Executions
    // ========================================================================

    pub fn get_execution(&self, execution_id: &ExecutionId) -> Result<Execution> {
        self.lifecycle
            .get(execution_id)
            .ok_or_else(|| OrchestratorError::not_found("execution", execution_id.to_string()))
    }

    pub fn list_executions(&self, job_id: Option<&JobId>) -> Vec<Execution> {
        self.lifecycle.list(job_id)
    }

    pub async fn cancel_execution(
        &self,
        execution_id: &ExecutionId,
        reason: &str,
        force: bool,
    ) -> Result<ExecutionStatus> {
        Arc::clone(&self.lifecycle)
            .cancel_execution(execution_id, reason, force)
            .await
    }

    /// Replayable live log stream.
    pub fn subscribe_logs(
        &self,
        execution_id: &ExecutionId,
        from: Option<DateTime<Utc>>,
    ) -> Result<(Vec<LogEntry>, tokio::sync::broadcast::Receiver<LogEntry>)> {
        self.lifecycle.subscribe_logs(execution_id, from)
    }

    /// Replayable live event stream.
    pub fn subscribe_events(
        &self,
        execution_id: &ExecutionId,
        from: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Event>, tokio::sync::broadcast::Receiver<Event>)> {
        self.lifecycle.subscribe_events(execution_id, from)
    }

    /// Replay: the retained event history without a live tail.
    pub fn replay_events(&self, execution_id: &ExecutionId) -> Result<Vec<Event>> {
        let (history, _rx) = self.lifecycle.subscribe_events(execution_id, None)?;
        Ok(history)
    }

    // ========================================================================
    // Pools
    // ========================================================================

    pub async fn create_pool(&self, name: &str, kind: PoolKind, slots: u32) -> Result<Pool> {
        self.pools.create_pool(name, kind, slots).await
    }

    pub async fn update_pool(
        &self,
        pool_id: &PoolId,
        name: Option<&str>,
        slots: Option<u32>,
    ) -> Result<Pool> {
        self.pools.update_pool(pool_id, name, slots).await
    }

    pub async fn delete_pool(&self, pool_id: &PoolId) -> Result<()> {
        self.pools.delete_pool(pool_id).await
    }

    pub fn get_pool(&self, pool_id: &PoolId) -> Result<Pool> {
        self.pools
            .get(pool_id)
            .ok_or_else(|| OrchestratorError::not_found("pool", pool_id.to_string()))
    }

    pub fn list_pools(&self) -> Vec<Pool> {
        self.pools.list()
    }

    /// Drain a pool. Existing executions may finish; after `timeout`, if
    /// `force`, the stragglers are cancelled on their workers.
    pub async fn drain_pool(&self, pool_id: &PoolId, timeout: Duration, force: bool) -> Result<Pool> {
        let pool = self.pools.drain(pool_id).await?;
        if force {
            let lifecycle = Arc::clone(&self.lifecycle);
            let pools = Arc::clone(&self.pools);
            let pool_id = pool_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let Some(pool) = pools.get(&pool_id) else {
                    return;
                };
                if pool.status != hodei_protocol::PoolStatus::Draining {
                    return;
                }
                for execution in lifecycle.active_in_pool(&pool_id) {
                    warn!(
                        "Force-cancelling execution {} still running in draining pool {}",
                        execution.id, pool_id
                    );
                    if let Err(err) = Arc::clone(&lifecycle)
                        .cancel_execution(&execution.id, "pool drained", true)
                        .await
                    {
                        warn!("Drain cancel of {} failed: {}", execution.id, err);
                    }
                }
            });
        }
        Ok(pool)
    }

    pub async fn resume_pool(&self, pool_id: &PoolId) -> Result<Pool> {
        let pool = self.pools.resume(pool_id).await?;
        self.wake.notify();
        Ok(pool)
    }

    pub async fn set_maintenance(
        &self,
        pool_id: &PoolId,
        reason: &str,
        allow_new_jobs: bool,
    ) -> Result<Pool> {
        self.pools.set_maintenance(pool_id, reason, allow_new_jobs).await
    }

    /// Workers currently registered in a pool.
    pub fn pool_workers(&self, pool_id: &PoolId) -> Vec<WorkerSession> {
        self.registry
            .list()
            .into_iter()
            .filter(|w| w.pool_id == *pool_id)
            .collect()
    }

    // ========================================================================
    // Quotas
    // ========================================================================

    pub async fn set_quota(
        &self,
        namespace: &str,
        mode: QuotaPolicyMode,
        limits: QuotaLimits,
    ) -> Result<Quota> {
        self.pools.set_quota(namespace, mode, limits).await
    }

    pub fn get_quota(&self, namespace: &str) -> Result<Quota> {
        self.pools
            .get_quota(namespace)
            .ok_or_else(|| OrchestratorError::not_found("quota", namespace.to_string()))
    }

    pub fn list_quotas(&self) -> Vec<Quota> {
        self.pools.list_quotas()
    }

    pub async fn delete_quota(&self, namespace: &str) -> Result<()> {
        self.pools.delete_quota(namespace).await
    }

    // ========================================================================
    // Workers
    // ========================================================================

    pub fn list_workers(&self) -> Vec<WorkerSession> {
        self.registry.list()
    }

    pub fn get_worker(&self, worker_id: &WorkerId) -> Result<WorkerSession> {
        self.registry
            .get(worker_id)
            .ok_or_else(|| OrchestratorError::not_found("worker", worker_id.to_string()))
    }

    pub async fn unregister_worker(&self, worker_id: &WorkerId) -> Result<()> {
        self.transport.unregister_worker(worker_id).await
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    pub fn put_artifact(&self, bytes: &[u8]) -> Result<String> {
        Ok(self.cache.put(bytes)?)
    }

    pub fn get_artifact(&self, artifact_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(artifact_id)?)
    }

    pub fn has_artifacts(&self, artifact_ids: &[String]) -> HashSet<String> {
        self.cache.has(artifact_ids.iter().map(|s| s.as_str()))
    }
}
