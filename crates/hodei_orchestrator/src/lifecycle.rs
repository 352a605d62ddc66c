//! Execution lifecycle: the state machine for execution entities, terminal
//! side effects, and the per-execution log/event streams.
//!
//! Executions move PENDING -> RUNNING -> {SUCCESS | FAILED | CANCELLED}
//! exactly once. All mutation funnels through this module; an illegal
//! transition aborts the affected execution with an internal error and never
//! the orchestrator. Terminal transitions release pool capacity and quota,
//! notify the event bus, and fold the outcome into the parent job (applying
//! the retry policy on failure).

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::jobs::JobStore;
use crate::metrics::METRICS;
use crate::models::{Event, EventKind, Execution, Job};
use crate::pools::PoolManager;
use crate::registry::WorkerRegistry;
use crate::transport::Outbound;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hodei_ids::{ExecutionId, JobId, PoolId, WorkerId};
use hodei_protocol::{
    CancelJobPayload, ExecutionStatus, JobStatus, LogChunkPayload, LogStream, OpCode,
    StatusUpdatePayload,
};
use hodei_state::{save_entity, Repository};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

const STREAM_CAPACITY: usize = 256;

/// One log line of an execution, as exposed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

/// How a terminal execution folds into its parent job.
enum Fold {
    /// Apply the normal rules (retry policy on failure)
    Policy,
    /// The job was cancelled; never retry
    JobCancelled,
}

struct ExecutionEntry {
    execution: Execution,
    /// Copied from the job at creation so releases never need a job lookup
    namespace: String,
    resources: hodei_protocol::ResourceSpec,
    retry_policy: hodei_protocol::RetryPolicy,
    logs: VecDeque<LogEntry>,
    logs_tx: tokio::sync::broadcast::Sender<LogEntry>,
    events: VecDeque<Event>,
    events_tx: tokio::sync::broadcast::Sender<Event>,
}

impl ExecutionEntry {
    fn new(execution: Execution, job: &Job) -> Self {
        let (logs_tx, _) = tokio::sync::broadcast::channel(STREAM_CAPACITY);
        let (events_tx, _) = tokio::sync::broadcast::channel(STREAM_CAPACITY);
        Self {
            execution,
            namespace: job.definition.namespace.clone(),
            resources: job.definition.resources,
            retry_policy: job.definition.retry_policy,
            logs: VecDeque::new(),
            logs_tx,
            events: VecDeque::new(),
            events_tx,
        }
    }
}

pub struct ExecutionLifecycle {
    config: OrchestratorConfig,
    repo: Arc<dyn Repository>,
    jobs: Arc<JobStore>,
    pools: Arc<PoolManager>,
    registry: Arc<WorkerRegistry>,
    bus: Arc<EventBus>,
    outbound: Arc<Outbound>,
    inner: Mutex<HashMap<ExecutionId, ExecutionEntry>>,
}

impl ExecutionLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        repo: Arc<dyn Repository>,
        jobs: Arc<JobStore>,
        pools: Arc<PoolManager>,
        registry: Arc<WorkerRegistry>,
        bus: Arc<EventBus>,
        outbound: Arc<Outbound>,
    ) -> Self {
        Self {
            config,
            repo,
            jobs,
            pools,
            registry,
            bus,
            outbound,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild execution history at boot. In-flight executions did not
    /// survive the restart; they are settled as failed.
    pub async fn load_from_repo(&self) -> Result<usize> {
        let executions: Vec<Execution> =
            hodei_state::load_entities(self.repo.as_ref()).await?;
        let count = executions.len();
        let mut interrupted = Vec::new();

        {
            let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
            for mut execution in executions {
                if !execution.status.is_terminal() {
                    execution.status = ExecutionStatus::Failed;
                    execution.error_kind = Some("WorkerDisconnected".to_string());
                    execution.message = Some("orchestrator restarted mid-flight".to_string());
                    execution.finished_at = Some(Utc::now());
                    interrupted.push(execution.clone());
                }
                let (logs_tx, _) = tokio::sync::broadcast::channel(STREAM_CAPACITY);
                let (events_tx, _) = tokio::sync::broadcast::channel(STREAM_CAPACITY);
                inner.insert(
                    execution.id.clone(),
                    ExecutionEntry {
                        execution,
                        namespace: String::new(),
                        resources: Default::default(),
                        retry_policy: Default::default(),
                        logs: VecDeque::new(),
                        logs_tx,
                        events: VecDeque::new(),
                        events_tx,
                    },
                );
            }
        }

        for execution in interrupted {
            save_entity(self.repo.as_ref(), &execution).await?;
            warn!(
                "Execution {} was in flight during restart, marked FAILED",
                execution.id
            );
        }
        Ok(count)
    }

    /// Create a PENDING execution for a claimed job. Called by the scheduler
    /// after capacity and quota are reserved.
    pub async fn create_execution(
        &self,
        job: &Job,
        pool_id: PoolId,
        worker_id: WorkerId,
    ) -> Result<Execution> {
        let job = self.jobs.record_attempt(&job.id).await?;
        let mut execution = Execution::new(&job, pool_id, worker_id);
        // record_attempt already bumped the counter; attempts are 1-based
        // there while execution attempts stay 0-based.
        execution.attempt = job.attempts - 1;

        {
            let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
            inner.insert(
                execution.id.clone(),
                ExecutionEntry::new(execution.clone(), &job),
            );
        }
        save_entity(self.repo.as_ref(), &execution).await?;

        self.publish_execution_event(
            &execution.id,
            Event::new(EventKind::ExecutionCreated)
                .execution(&execution.id)
                .job(&execution.job_id)
                .worker(&execution.worker_id),
        );
        debug!(
            "Execution {} created for job {} (attempt {})",
            execution.id, execution.job_id, execution.attempt
        );
        Ok(execution)
    }

    pub fn get(&self, execution_id: &ExecutionId) -> Option<Execution> {
        let inner = self.inner.lock().expect("lifecycle lock poisoned");
        inner.get(execution_id).map(|e| e.execution.clone())
    }

    /// Executions, optionally restricted to one job, newest first.
    pub fn list(&self, job_id: Option<&JobId>) -> Vec<Execution> {
        let inner = self.inner.lock().expect("lifecycle lock poisoned");
        let mut executions: Vec<Execution> = inner
            .values()
            .map(|e| &e.execution)
            .filter(|e| job_id.map_or(true, |j| e.job_id == *j))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions
    }

    /// Executions currently assigned to workers of a pool (for drain).
    pub fn active_in_pool(&self, pool_id: &PoolId) -> Vec<Execution> {
        let inner = self.inner.lock().expect("lifecycle lock poisoned");
        inner
            .values()
            .map(|e| &e.execution)
            .filter(|e| e.pool_id == *pool_id && !e.status.is_terminal())
            .cloned()
            .collect()
    }

    // ========================================================================
    // Status updates from the worker
    // ========================================================================

    /// Apply a worker's StatusUpdate. The transport has already validated the
    /// session token; this validates the worker actually owns the execution.
    pub async fn handle_status_update(
        self: Arc<Self>,
        worker_id: &WorkerId,
        update: StatusUpdatePayload,
    ) -> Result<()> {
        let execution = self.get(&update.execution_id).ok_or_else(|| {
            OrchestratorError::not_found("execution", update.execution_id.to_string())
        })?;
        if execution.worker_id != *worker_id {
            return Err(OrchestratorError::Conflict(format!(
                "execution {} is not assigned to worker {}",
                update.execution_id, worker_id
            )));
        }

        match update.status {
            ExecutionStatus::Running => self.mark_running(&update.execution_id).await,
            ExecutionStatus::Success => {
                self.settle(
                    &update.execution_id,
                    ExecutionStatus::Success,
                    None,
                    update.message,
                    update.exit_code,
                    Some((update.produced_artifacts, update.metrics)),
                    Fold::Policy,
                )
                .await
            }
            ExecutionStatus::Failed => {
                self.settle(
                    &update.execution_id,
                    ExecutionStatus::Failed,
                    None,
                    update.message,
                    update.exit_code,
                    Some((update.produced_artifacts, update.metrics)),
                    Fold::Policy,
                )
                .await
            }
            ExecutionStatus::Cancelled => {
                self.settle(
                    &update.execution_id,
                    ExecutionStatus::Cancelled,
                    None,
                    update.message,
                    update.exit_code,
                    None,
                    Fold::JobCancelled,
                )
                .await
            }
            ExecutionStatus::Pending => Err(OrchestratorError::internal(format!(
                "worker reported PENDING for execution {}",
                update.execution_id
            ))),
        }
    }

    /// First RUNNING update: closes the dispatch window, starts the per-job
    /// timeout watchdog. Idempotent for repeated RUNNING updates. A RUNNING
    /// report for a job the operator already cancelled settles the execution
    /// as CANCELLED instead.
    async fn mark_running(self: Arc<Self>, execution_id: &ExecutionId) -> Result<()> {
        if let Some(snapshot) = self.get(execution_id) {
            if let Some(job) = self.jobs.get(&snapshot.job_id) {
                if job.status.is_terminal() {
                    return self
                        .settle(
                            execution_id,
                            ExecutionStatus::Cancelled,
                            None,
                            Some("job reached a terminal state before the worker started".into()),
                            None,
                            None,
                            Fold::JobCancelled,
                        )
                        .await;
                }
            }
        }

        let execution = {
            let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
            let entry = inner.get_mut(execution_id).ok_or_else(|| {
                OrchestratorError::not_found("execution", execution_id.to_string())
            })?;
            match entry.execution.status {
                ExecutionStatus::Running => return Ok(()),
                ExecutionStatus::Pending => {}
                terminal => {
                    // Late RUNNING after the server already settled (e.g.
                    // dispatch timeout raced the worker). Ignore.
                    debug!(
                        "Ignoring RUNNING for execution {} already {}",
                        execution_id, terminal
                    );
                    return Ok(());
                }
            }
            entry.execution.status = ExecutionStatus::Running;
            entry.execution.started_at = Some(Utc::now());
            entry.execution.updated_at = Utc::now();
            entry.execution.clone()
        };

        save_entity(self.repo.as_ref(), &execution).await?;
        self.jobs.set_status(&execution.job_id, JobStatus::Running).await?;
        self.publish_execution_event(
            execution_id,
            Event::new(EventKind::ExecutionStarted)
                .execution(execution_id)
                .job(&execution.job_id),
        );
        info!("Execution {} running on {}", execution_id, execution.worker_id);

        // Per-job timeout watchdog.
        let job_timeout = self
            .jobs
            .get(&execution.job_id)
            .map(|j| j.definition.timeout_secs)
            .unwrap_or(hodei_protocol::defaults::DEFAULT_JOB_TIMEOUT_SECS);
        let lifecycle = Arc::clone(&self);
        let exec_id = execution_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(job_timeout)).await;
            lifecycle.enforce_job_timeout(&exec_id, job_timeout).await;
        });
        Ok(())
    }

    async fn enforce_job_timeout(&self, execution_id: &ExecutionId, timeout_secs: u64) {
        let Some(execution) = self.get(execution_id) else {
            return;
        };
        if execution.status != ExecutionStatus::Running {
            return;
        }
        warn!(
            "Execution {} exceeded its {}s timeout, cancelling on worker and failing",
            execution_id, timeout_secs
        );
        let cancel = CancelJobPayload {
            execution_id: execution_id.clone(),
            force: true,
            reason: format!("job timeout after {timeout_secs}s"),
        };
        if let Err(err) = self
            .outbound
            .send_json(&execution.worker_id, OpCode::CancelJob, &cancel)
            .await
        {
            warn!("Could not deliver timeout cancel to worker: {}", err);
        }
        if let Err(err) = self
            .settle(
                execution_id,
                ExecutionStatus::Failed,
                None,
                Some(format!("job timeout after {timeout_secs}s")),
                None,
                None,
                Fold::Policy,
            )
            .await
        {
            error!("Failed to settle timed-out execution {}: {}", execution_id, err);
        }
    }

    /// Dispatch-window watchdog: PENDING past the deadline becomes FAILED
    /// with `DispatchTimeout` and the job is retried per policy.
    pub async fn enforce_dispatch_window(&self, execution_id: &ExecutionId) {
        let Some(execution) = self.get(execution_id) else {
            return;
        };
        if execution.status != ExecutionStatus::Pending {
            return;
        }
        warn!(
            "Execution {} never reached RUNNING within {:?}",
            execution_id, self.config.dispatch_timeout
        );
        if let Err(err) = self
            .fail_execution(
                execution_id,
                "DispatchTimeout",
                &format!(
                    "worker did not confirm RUNNING within {:?}",
                    self.config.dispatch_timeout
                ),
            )
            .await
        {
            error!("Failed to settle timed-out dispatch {}: {}", execution_id, err);
        }
    }

    /// Fail an execution with a semantic error kind (dispatch timeout,
    /// worker loss, corrupt artifact, invalid session).
    pub async fn fail_execution(
        &self,
        execution_id: &ExecutionId,
        kind: &str,
        message: &str,
    ) -> Result<()> {
        self.settle(
            execution_id,
            ExecutionStatus::Failed,
            Some(kind.to_string()),
            Some(message.to_string()),
            None,
            None,
            Fold::Policy,
        )
        .await
    }

    /// A worker vanished (missed heartbeats, invalid session, transport
    /// break): fail whatever it was running.
    pub async fn handle_worker_lost(&self, worker_id: &WorkerId, reason: &str) {
        let affected: Vec<ExecutionId> = {
            let inner = self.inner.lock().expect("lifecycle lock poisoned");
            inner
                .values()
                .filter(|e| e.execution.worker_id == *worker_id && !e.execution.status.is_terminal())
                .map(|e| e.execution.id.clone())
                .collect()
        };
        for execution_id in affected {
            if let Err(err) = self
                .fail_execution(&execution_id, "WorkerDisconnected", reason)
                .await
            {
                error!(
                    "Failed to settle execution {} of lost worker {}: {}",
                    execution_id, worker_id, err
                );
            }
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel an execution. Idempotent: terminal executions return their
    /// status unchanged. A RUNNING execution gets a CancelJob and a grace
    /// watchdog; no terminal StatusUpdate within the grace period means the
    /// execution is forced CANCELLED and the worker marked ERROR.
    pub async fn cancel_execution(
        self: Arc<Self>,
        execution_id: &ExecutionId,
        reason: &str,
        force: bool,
    ) -> Result<ExecutionStatus> {
        let execution = self.get(execution_id).ok_or_else(|| {
            OrchestratorError::not_found("execution", execution_id.to_string())
        })?;

        match execution.status {
            status if status.is_terminal() => Ok(status),
            ExecutionStatus::Pending => {
                // Not yet running anywhere; settle directly. The worker will
                // drop a late JobRequest-less cancel on the floor.
                self.settle(
                    execution_id,
                    ExecutionStatus::Cancelled,
                    None,
                    Some(reason.to_string()),
                    None,
                    None,
                    Fold::JobCancelled,
                )
                .await?;
                Ok(ExecutionStatus::Cancelled)
            }
            ExecutionStatus::Running => {
                let cancel = CancelJobPayload {
                    execution_id: execution_id.clone(),
                    force,
                    reason: reason.to_string(),
                };
                self.outbound
                    .send_json(&execution.worker_id, OpCode::CancelJob, &cancel)
                    .await?;
                info!("CancelJob sent for execution {}", execution_id);

                let lifecycle = Arc::clone(&self);
                let exec_id = execution_id.clone();
                let worker_id = execution.worker_id.clone();
                let grace = self.config.cancel_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    lifecycle.enforce_cancel_grace(&exec_id, &worker_id, grace).await;
                });

                if force {
                    // Force means "do not wait for worker confirmation".
                    self.settle(
                        execution_id,
                        ExecutionStatus::Cancelled,
                        None,
                        Some(reason.to_string()),
                        None,
                        None,
                        Fold::JobCancelled,
                    )
                    .await?;
                    return Ok(ExecutionStatus::Cancelled);
                }
                Ok(ExecutionStatus::Running)
            }
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                unreachable!("terminal handled above")
            }
        }
    }

    async fn enforce_cancel_grace(
        &self,
        execution_id: &ExecutionId,
        worker_id: &WorkerId,
        grace: std::time::Duration,
    ) {
        let Some(execution) = self.get(execution_id) else {
            return;
        };
        if execution.status.is_terminal() {
            return;
        }
        warn!(
            "Worker {} ignored cancel for {} within {:?}; forcing CANCELLED and marking worker ERROR",
            worker_id, execution_id, grace
        );
        self.registry.mark_error(worker_id);
        if let Err(err) = self
            .settle(
                execution_id,
                ExecutionStatus::Cancelled,
                Some("CancelTimeout".to_string()),
                Some(format!("worker ignored cancel within {grace:?}")),
                None,
                None,
                Fold::JobCancelled,
            )
            .await
        {
            error!("Failed to force-cancel execution {}: {}", execution_id, err);
        }
    }

    // ========================================================================
    // Terminal settlement
    // ========================================================================

    /// The single terminal transition point. Exactly one caller wins the
    /// race; everyone else observes a terminal state and backs off.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        execution_id: &ExecutionId,
        terminal: ExecutionStatus,
        error_kind: Option<String>,
        message: Option<String>,
        exit_code: Option<i32>,
        outputs: Option<(Vec<hodei_protocol::ArtifactRef>, HashMap<String, i64>)>,
        fold: Fold,
    ) -> Result<()> {
        debug_assert!(terminal.is_terminal());

        let (execution, namespace, resources, retry_policy) = {
            let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
            let entry = inner.get_mut(execution_id).ok_or_else(|| {
                OrchestratorError::not_found("execution", execution_id.to_string())
            })?;
            if entry.execution.status.is_terminal() {
                return Ok(());
            }
            entry.execution.status = terminal;
            entry.execution.finished_at = Some(Utc::now());
            entry.execution.updated_at = Utc::now();
            entry.execution.error_kind = error_kind;
            entry.execution.message = message.clone();
            entry.execution.exit_code = exit_code;
            if let Some((artifacts, metrics)) = outputs {
                entry.execution.produced_artifacts = artifacts;
                entry.execution.metrics = metrics;
            }
            (
                entry.execution.clone(),
                entry.namespace.clone(),
                entry.resources,
                entry.retry_policy,
            )
        };

        save_entity(self.repo.as_ref(), &execution).await?;

        // Release what the scheduler reserved.
        self.registry.release(&execution.worker_id, execution_id);
        self.pools
            .release_capacity(&execution.pool_id, &resources)
            .await?;
        self.pools.release_quota(&namespace, &resources).await?;

        let event_kind = match terminal {
            ExecutionStatus::Success => EventKind::ExecutionCompleted,
            ExecutionStatus::Failed => EventKind::ExecutionFailed,
            ExecutionStatus::Cancelled => EventKind::ExecutionCancelled,
            _ => unreachable!("settle only takes terminal states"),
        };
        self.publish_execution_event(
            execution_id,
            Event::new(event_kind)
                .execution(execution_id)
                .job(&execution.job_id)
                .worker(&execution.worker_id),
        );
        info!(
            "Execution {} settled {} ({})",
            execution_id,
            terminal,
            execution.message.as_deref().unwrap_or("-")
        );

        self.fold_into_job(&execution, terminal, retry_policy, fold).await
    }

    /// Propagate a terminal execution into its parent job.
    async fn fold_into_job(
        &self,
        execution: &Execution,
        terminal: ExecutionStatus,
        retry_policy: hodei_protocol::RetryPolicy,
        fold: Fold,
    ) -> Result<()> {
        let job_id = &execution.job_id;
        let Some(job) = self.jobs.get(job_id) else {
            return Err(OrchestratorError::not_found("job", job_id.to_string()));
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        match (terminal, fold) {
            (ExecutionStatus::Success, _) => {
                self.jobs.set_status(job_id, JobStatus::Completed).await?;
                METRICS.inc(&METRICS.jobs_completed);
                self.bus
                    .publish(Event::new(EventKind::JobCompleted).job(job_id));
                info!("Job {} completed", job_id);
            }
            (ExecutionStatus::Cancelled, _) | (_, Fold::JobCancelled) => {
                self.jobs.set_status(job_id, JobStatus::Cancelled).await?;
                METRICS.inc(&METRICS.jobs_cancelled);
                self.bus
                    .publish(Event::new(EventKind::JobCancelled).job(job_id));
            }
            (ExecutionStatus::Failed, Fold::Policy) => {
                let reason = execution
                    .message
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string());
                // attempts is the number of executions created so far; the
                // policy allows max_retries extra beyond the first.
                if job.attempts <= retry_policy.max_retries {
                    let delay = retry_policy.delay_for_attempt(job.attempts.saturating_sub(1));
                    let not_before = Utc::now()
                        + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
                    self.jobs
                        .requeue(job_id, &reason, Some(not_before))
                        .await?;
                    info!(
                        "Job {} will retry in {:?} (attempt {} of {})",
                        job_id,
                        delay,
                        job.attempts,
                        retry_policy.max_retries + 1
                    );
                } else {
                    self.jobs.set_status(job_id, JobStatus::Failed).await?;
                    self.jobs.record_error(job_id, &reason).await?;
                    METRICS.inc(&METRICS.jobs_failed);
                    self.bus.publish(Event::new(EventKind::JobFailed).job(job_id));
                    info!("Job {} failed terminally: {}", job_id, reason);
                }
            }
            _ => {
                return Err(OrchestratorError::internal(format!(
                    "unhandled fold for execution {} terminal {}",
                    execution.id, terminal
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Log and event streams
    // ========================================================================

    /// Append a log line from the worker. Best-effort: history is bounded by
    /// the retention window, live subscribers may observe `Lagged`.
    pub fn append_log(&self, chunk: LogChunkPayload) {
        let retention =
            ChronoDuration::from_std(self.config.log_retention).unwrap_or(ChronoDuration::hours(24));
        let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
        let Some(entry) = inner.get_mut(&chunk.execution_id) else {
            debug!("Dropping log line for unknown execution {}", chunk.execution_id);
            return;
        };
        let log = LogEntry {
            at: chunk
                .at
                .to_datetime()
                .unwrap_or_else(Utc::now),
            stream: chunk.stream,
            line: chunk.line,
        };
        let cutoff = Utc::now() - retention;
        while entry.logs.front().is_some_and(|l| l.at < cutoff) {
            entry.logs.pop_front();
        }
        entry.logs.push_back(log.clone());
        let _ = entry.logs_tx.send(log);
    }

    fn publish_execution_event(&self, execution_id: &ExecutionId, event: Event) {
        let retention = ChronoDuration::from_std(self.config.event_retention)
            .unwrap_or(ChronoDuration::days(7));
        {
            let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
            if let Some(entry) = inner.get_mut(execution_id) {
                let cutoff = Utc::now() - retention;
                while entry.events.front().is_some_and(|e| e.at < cutoff) {
                    entry.events.pop_front();
                }
                entry.events.push_back(event.clone());
                let _ = entry.events_tx.send(event.clone());
            }
        }
        self.bus.publish(event);
    }

    /// Replayable log stream: history from `from` plus a live receiver.
    pub fn subscribe_logs(
        &self,
        execution_id: &ExecutionId,
        from: Option<DateTime<Utc>>,
    ) -> Result<(Vec<LogEntry>, tokio::sync::broadcast::Receiver<LogEntry>)> {
        let inner = self.inner.lock().expect("lifecycle lock poisoned");
        let entry = inner.get(execution_id).ok_or_else(|| {
            OrchestratorError::not_found("execution", execution_id.to_string())
        })?;
        let history = entry
            .logs
            .iter()
            .filter(|l| from.map_or(true, |t| l.at >= t))
            .cloned()
            .collect();
        Ok((history, entry.logs_tx.subscribe()))
    }

    /// Replayable event stream: guaranteed in-order per execution.
    pub fn subscribe_events(
        &self,
        execution_id: &ExecutionId,
        from: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Event>, tokio::sync::broadcast::Receiver<Event>)> {
        let inner = self.inner.lock().expect("lifecycle lock poisoned");
        let entry = inner.get(execution_id).ok_or_else(|| {
            OrchestratorError::not_found("execution", execution_id.to_string())
        })?;
        let history = entry
            .events
            .iter()
            .filter(|e| from.map_or(true, |t| e.at >= t))
            .cloned()
            .collect();
        Ok((history, entry.events_tx.subscribe()))
    }
}
