//! Job store and priority queue.
//!
//! The store is the authoritative Job table, held in memory and written
//! through to the repository on every change. The queue is a strict priority
//! queue keyed by `(priority desc, enqueued_at asc)`; FIFO within a priority
//! class falls out of the enqueue timestamp plus a monotone sequence number
//! for same-instant submissions.

use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::metrics::METRICS;
use crate::models::{Event, EventKind, Job, JobDefinition};
use chrono::{DateTime, Utc};
use hodei_ids::JobId;
use hodei_protocol::defaults::MAX_JOB_TIMEOUT_SECS;
use hodei_protocol::{validate_artifact_id, JobStatus};
use hodei_state::{save_entity, Repository};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Queue rank: highest priority first, oldest enqueue first within a class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    enqueued_at: DateTime<Utc>,
    seq: u64,
}

struct Inner {
    jobs: HashMap<JobId, Job>,
    queue: BTreeMap<QueueKey, JobId>,
    seq: u64,
}

/// Outcome of a cancel request, so the caller knows whether to propagate.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Job was queued (or pending assignment); cancelled in place
    Cancelled,
    /// Job is running; the lifecycle must propagate to the worker
    RunningPropagate,
    /// Job already reached a terminal state; nothing to do
    AlreadyTerminal(JobStatus),
}

pub struct JobStore {
    repo: Arc<dyn Repository>,
    events: Arc<EventBus>,
    inner: Mutex<Inner>,
}

impl JobStore {
    pub fn new(repo: Arc<dyn Repository>, events: Arc<EventBus>) -> Self {
        Self {
            repo,
            events,
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                queue: BTreeMap::new(),
                seq: 0,
            }),
        }
    }

    /// Rebuild in-memory state from the repository at boot. Jobs that were
    /// mid-claim (PENDING) when the process died go back to the queue.
    pub async fn load_from_repo(&self) -> Result<usize> {
        let jobs: Vec<Job> = hodei_state::load_entities(self.repo.as_ref()).await?;
        let count = jobs.len();
        let mut recovered = Vec::new();

        {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            for mut job in jobs {
                if job.status == JobStatus::Pending || job.status == JobStatus::Running {
                    // The claim or dispatch did not survive the restart.
                    job.status = JobStatus::Queued;
                    recovered.push(job.clone());
                }
                if job.status == JobStatus::Queued {
                    let key = Self::key_for(&mut inner, &job);
                    inner.queue.insert(key, job.id.clone());
                }
                inner.jobs.insert(job.id.clone(), job);
            }
        }

        for job in recovered {
            save_entity(self.repo.as_ref(), &job).await?;
            info!("Recovered job {} back to QUEUED after restart", job.id);
        }
        Ok(count)
    }

    fn key_for(inner: &mut Inner, job: &Job) -> QueueKey {
        inner.seq += 1;
        QueueKey {
            priority: Reverse(job.definition.priority.rank()),
            enqueued_at: job.enqueued_at,
            seq: inner.seq,
        }
    }

    fn validate(definition: &JobDefinition) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(OrchestratorError::ValidationFailed(
                "job name must not be empty".to_string(),
            ));
        }
        if definition.content.is_empty() {
            return Err(OrchestratorError::ValidationFailed(
                "job content must not be empty".to_string(),
            ));
        }
        if definition.timeout_secs == 0 || definition.timeout_secs > MAX_JOB_TIMEOUT_SECS {
            return Err(OrchestratorError::ValidationFailed(format!(
                "job timeout must be within 1..={} seconds",
                MAX_JOB_TIMEOUT_SECS
            )));
        }
        for artifact in &definition.required_artifacts {
            validate_artifact_id(&artifact.id).map_err(|e| {
                OrchestratorError::ValidationFailed(format!(
                    "required artifact '{}': {}",
                    artifact.name, e
                ))
            })?;
        }
        Ok(())
    }

    /// Submit a job: validate, persist, enqueue, emit `job.created`.
    pub async fn submit(&self, definition: JobDefinition) -> Result<Job> {
        Self::validate(&definition)?;
        let job = Job::from_definition(definition);

        {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let key = Self::key_for(&mut inner, &job);
            inner.queue.insert(key, job.id.clone());
            inner.jobs.insert(job.id.clone(), job.clone());
        }

        save_entity(self.repo.as_ref(), &job).await?;
        METRICS.inc(&METRICS.jobs_submitted);
        self.events
            .publish(Event::new(EventKind::JobCreated).job(&job.id));
        info!("Job {} submitted ({})", job.id, job.definition.name);
        Ok(job)
    }

    /// Queue snapshot in dispatch order.
    pub fn ranked_queue(&self) -> Vec<Job> {
        let inner = self.inner.lock().expect("job store lock poisoned");
        inner
            .queue
            .values()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    pub fn queue_len(&self) -> usize {
        let inner = self.inner.lock().expect("job store lock poisoned");
        inner.queue.len()
    }

    /// Claim a queued job for assignment: QUEUED -> PENDING, out of the queue.
    pub async fn claim(&self, job_id: &JobId) -> Result<Job> {
        let job = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            inner.queue.retain(|_, id| id != job_id);
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;
            if job.status != JobStatus::Queued {
                return Err(OrchestratorError::Conflict(format!(
                    "job {} is {}, not QUEUED",
                    job_id, job.status
                )));
            }
            job.status = JobStatus::Pending;
            job.not_before = None;
            job.updated_at = Utc::now();
            job.clone()
        };
        save_entity(self.repo.as_ref(), &job).await?;
        debug!("Claimed job {} ({})", job.id, job.definition.name);
        Ok(job)
    }

    /// Undo a claim when no worker fits: back to the head of its priority
    /// class (the original enqueue time is kept).
    pub async fn release_claim(&self, job_id: &JobId) -> Result<()> {
        let job = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;
            if job.status != JobStatus::Pending {
                return Err(OrchestratorError::Conflict(format!(
                    "job {} is {}, not PENDING",
                    job_id, job.status
                )));
            }
            job.status = JobStatus::Queued;
            job.updated_at = Utc::now();
            let job = job.clone();
            let key = Self::key_for(&mut inner, &job);
            inner.queue.insert(key, job.id.clone());
            job
        };
        save_entity(self.repo.as_ref(), &job).await?;
        Ok(())
    }

    /// Re-queue after a failed execution: same priority, fresh enqueue time
    /// so retries cannot starve younger submissions. `not_before` gates the
    /// retry behind its backoff delay. Emits `job.retried`.
    pub async fn requeue(
        &self,
        job_id: &JobId,
        reason: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let job = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;
            if job.status.is_terminal() {
                return Err(OrchestratorError::Conflict(format!(
                    "job {} is terminal ({})",
                    job_id, job.status
                )));
            }
            job.status = JobStatus::Queued;
            job.enqueued_at = Utc::now();
            job.updated_at = job.enqueued_at;
            job.not_before = not_before;
            job.last_error = Some(reason.to_string());
            let job = job.clone();
            let key = Self::key_for(&mut inner, &job);
            inner.queue.insert(key, job.id.clone());
            job
        };
        save_entity(self.repo.as_ref(), &job).await?;
        METRICS.inc(&METRICS.jobs_retried);
        self.events
            .publish(Event::new(EventKind::JobRetried).job(job_id));
        info!("Job {} re-queued: {}", job_id, reason);
        Ok(())
    }

    /// Record a status transition driven by the lifecycle. Illegal
    /// transitions are an internal invariant violation, surfaced but never
    /// applied.
    pub async fn set_status(&self, job_id: &JobId, next: JobStatus) -> Result<Job> {
        let job = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;
            if job.status == next {
                return Ok(job.clone());
            }
            if !job.status.can_transition_to(next) {
                return Err(OrchestratorError::internal(format!(
                    "illegal job transition {} -> {} for {}",
                    job.status, next, job_id
                )));
            }
            job.status = next;
            job.updated_at = Utc::now();
            job.clone()
        };
        save_entity(self.repo.as_ref(), &job).await?;
        Ok(job)
    }

    /// Bump the attempt counter when an execution is created.
    pub async fn record_attempt(&self, job_id: &JobId) -> Result<Job> {
        let job = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;
            job.attempts += 1;
            job.updated_at = Utc::now();
            job.clone()
        };
        save_entity(self.repo.as_ref(), &job).await?;
        Ok(job)
    }

    /// Record a terminal failure reason on the job.
    pub async fn record_error(&self, job_id: &JobId, error: &str) -> Result<()> {
        let job = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;
            job.last_error = Some(error.to_string());
            job.updated_at = Utc::now();
            job.clone()
        };
        save_entity(self.repo.as_ref(), &job).await?;
        Ok(())
    }

    /// Cancel a job. Idempotent: terminal jobs report `AlreadyTerminal`.
    /// Queued/pending jobs cancel in place without side effects; running jobs
    /// hand propagation back to the caller.
    pub async fn cancel(&self, job_id: &JobId, reason: &str) -> Result<CancelOutcome> {
        let (outcome, job) = {
            let mut inner = self.inner.lock().expect("job store lock poisoned");
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::not_found("job", job_id.to_string()))?;

            match job.status {
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                    (CancelOutcome::AlreadyTerminal(job.status), None)
                }
                JobStatus::Running => (CancelOutcome::RunningPropagate, None),
                JobStatus::Queued | JobStatus::Pending => {
                    job.status = JobStatus::Cancelled;
                    job.last_error = Some(reason.to_string());
                    job.updated_at = Utc::now();
                    let job = job.clone();
                    inner.queue.retain(|_, id| id != job_id);
                    (CancelOutcome::Cancelled, Some(job))
                }
            }
        };

        if let Some(job) = job {
            save_entity(self.repo.as_ref(), &job).await?;
            METRICS.inc(&METRICS.jobs_cancelled);
            self.events
                .publish(Event::new(EventKind::JobCancelled).job(job_id));
            info!("Job {} cancelled: {}", job_id, reason);
        }
        Ok(outcome)
    }

    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        let inner = self.inner.lock().expect("job store lock poisoned");
        inner.jobs.get(job_id).cloned()
    }

    /// Jobs filtered by status, newest first, with offset/limit paging.
    pub fn list(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> Vec<Job> {
        let inner = self.inner.lock().expect("job store lock poisoned");
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.into_iter().skip(offset).take(limit).collect()
    }

    pub fn counts_by_status(&self) -> HashMap<JobStatus, usize> {
        let inner = self.inner.lock().expect("job store lock poisoned");
        let mut counts = HashMap::new();
        for job in inner.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_protocol::{JobContent, JobPriority};
    use hodei_state::MemoryRepository;

    fn store() -> JobStore {
        JobStore::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(EventBus::new()),
        )
    }

    fn definition(name: &str, priority: JobPriority) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            namespace: "default".to_string(),
            template_id: None,
            priority,
            content: JobContent::Shell {
                commands: vec!["echo ok".to_string()],
            },
            parameters: Default::default(),
            env: Default::default(),
            required_artifacts: Vec::new(),
            required_capabilities: Default::default(),
            resources: Default::default(),
            timeout_secs: 3600,
            retry_policy: Default::default(),
            created_by: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_enqueues() {
        let store = store();
        let job = store.submit(definition("a", JobPriority::Normal)).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(store.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let store = store();
        store.submit(definition("low", JobPriority::Low)).await.unwrap();
        store.submit(definition("critical", JobPriority::Critical)).await.unwrap();
        store.submit(definition("normal", JobPriority::Normal)).await.unwrap();

        let ranked = store.ranked_queue();
        let names: Vec<&str> = ranked.iter().map(|j| j.definition.name.as_str()).collect();
        assert_eq!(names, vec!["critical", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let store = store();
        store.submit(definition("first", JobPriority::Normal)).await.unwrap();
        store.submit(definition("second", JobPriority::Normal)).await.unwrap();

        let ranked = store.ranked_queue();
        assert_eq!(ranked[0].definition.name, "first");
        assert_eq!(ranked[1].definition.name, "second");
    }

    #[tokio::test]
    async fn test_claim_and_release_keeps_head_position() {
        let store = store();
        let first = store.submit(definition("first", JobPriority::Normal)).await.unwrap();
        store.submit(definition("second", JobPriority::Normal)).await.unwrap();

        let claimed = store.claim(&first.id).await.unwrap();
        assert_eq!(claimed.status, JobStatus::Pending);
        assert_eq!(store.queue_len(), 1);

        store.release_claim(&first.id).await.unwrap();
        let ranked = store.ranked_queue();
        // Original enqueue time keeps it at the head of its class.
        assert_eq!(ranked[0].id, first.id);
    }

    #[tokio::test]
    async fn test_requeue_moves_to_tail() {
        let store = store();
        let first = store.submit(definition("first", JobPriority::Normal)).await.unwrap();
        store.submit(definition("second", JobPriority::Normal)).await.unwrap();

        store.claim(&first.id).await.unwrap();
        store.requeue(&first.id, "retry", None).await.unwrap();

        let ranked = store.ranked_queue();
        assert_eq!(ranked[0].definition.name, "second");
        assert_eq!(ranked[1].id, first.id);
    }

    #[tokio::test]
    async fn test_cancel_queued_removes_from_queue() {
        let store = store();
        let job = store.submit(definition("a", JobPriority::Normal)).await.unwrap();

        let outcome = store.cancel(&job.id, "oops").await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(store.queue_len(), 0);
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let store = store();
        let job = store.submit(definition("a", JobPriority::Normal)).await.unwrap();

        store.cancel(&job.id, "first").await.unwrap();
        let outcome = store.cancel(&job.id, "second").await.unwrap();
        assert_eq!(
            outcome,
            CancelOutcome::AlreadyTerminal(JobStatus::Cancelled)
        );
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let store = store();
        let job = store.submit(definition("a", JobPriority::Normal)).await.unwrap();

        let err = store
            .set_status(&job.id, JobStatus::Completed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InternalError");
        // Status unchanged.
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_content() {
        let store = store();
        let mut definition = definition("a", JobPriority::Normal);
        definition.content = JobContent::Shell { commands: vec![] };

        let err = store.submit(definition).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationFailed");
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_artifact_id() {
        let store = store();
        let mut definition = definition("a", JobPriority::Normal);
        definition.required_artifacts.push(hodei_protocol::ArtifactRef {
            id: "not-hex".to_string(),
            name: "blob".to_string(),
            size: 1,
        });

        let err = store.submit(definition).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationFailed");
    }

    #[tokio::test]
    async fn test_restart_recovery_requeues_pending() {
        let repo = Arc::new(MemoryRepository::new());
        let events = Arc::new(EventBus::new());
        let store = JobStore::new(repo.clone(), events.clone());
        let job = store.submit(definition("a", JobPriority::Normal)).await.unwrap();
        store.claim(&job.id).await.unwrap();

        // Simulated restart: fresh store over the same repository.
        let store2 = JobStore::new(repo, events);
        store2.load_from_repo().await.unwrap();
        assert_eq!(store2.get(&job.id).unwrap().status, JobStatus::Queued);
        assert_eq!(store2.queue_len(), 1);
    }
}
