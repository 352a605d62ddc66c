//! Control-plane domain entities.
//!
//! Entities reference each other by id only; the registries in the sibling
//! modules own the lookup tables. Everything here serializes cleanly so the
//! repository can checkpoint it as JSON.

use chrono::{DateTime, Utc};
use hodei_ids::{EventId, ExecutionId, JobId, PoolId, QuotaId, TemplateId, WorkerId};
use hodei_protocol::{
    ArtifactRef, ExecutionStatus, JobContent, JobPriority, JobStatus, PoolKind, PoolStatus,
    QuotaPolicyMode, ResourceSpec, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Job
// ============================================================================

/// Immutable submission descriptor. Everything the orchestrator needs to run
/// a job, minus any mutable status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub priority: JobPriority,
    pub content: JobContent,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub required_artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub required_capabilities: HashMap<String, String>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default = "default_job_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default = "default_creator")]
    pub created_by: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_job_timeout_secs() -> u64 {
    hodei_protocol::defaults::DEFAULT_JOB_TIMEOUT_SECS
}

fn default_creator() -> String {
    "anonymous".to_string()
}

/// A submitted job: definition plus mutable status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub definition: JobDefinition,
    pub status: JobStatus,
    /// Executions created so far (retries included)
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Queue rank tiebreaker; refreshed on requeue so retries cannot starve
    /// younger submissions
    pub enqueued_at: DateTime<Utc>,
    /// Retry backoff gate: the scheduler skips the job until this passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    pub fn from_definition(definition: JobDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            definition,
            status: JobStatus::Queued,
            attempts: 0,
            created_at: now,
            updated_at: now,
            enqueued_at: now,
            not_before: None,
            last_error: None,
        }
    }

    /// Whether the scheduler may dispatch this job right now.
    pub fn dispatchable_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}

impl hodei_state::Entity for Job {
    const KIND: &'static str = "job";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

/// Reusable job template: a named definition that submissions can start from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: TemplateId,
    pub name: String,
    pub definition: JobDefinition,
    pub created_at: DateTime<Utc>,
}

impl hodei_state::Entity for JobTemplate {
    const KIND: &'static str = "template";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Execution
// ============================================================================

/// One attempt to run a job on a worker. Never deleted; retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub pool_id: PoolId,
    pub worker_id: WorkerId,
    /// 0-based attempt number within the parent job
    pub attempt: u32,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Semantic error kind tag when the execution failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produced_artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, i64>,
}

impl Execution {
    pub fn new(job: &Job, pool_id: PoolId, worker_id: WorkerId) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            job_id: job.id.clone(),
            pool_id,
            worker_id,
            attempt: job.attempts,
            status: ExecutionStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            exit_code: None,
            message: None,
            error_kind: None,
            produced_artifacts: Vec::new(),
            metrics: HashMap::new(),
        }
    }
}

impl hodei_state::Entity for Execution {
    const KIND: &'static str = "execution";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Pool & quota
// ============================================================================

/// Aggregated capacity of a pool's live workers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolCapacity {
    pub total: ResourceSpec,
    pub used: ResourceSpec,
    pub slots_total: u32,
    pub slots_used: u32,
}

impl PoolCapacity {
    pub fn available(&self) -> ResourceSpec {
        self.total.saturating_sub(&self.used)
    }

    pub fn slots_available(&self) -> u32 {
        self.slots_total.saturating_sub(self.slots_used)
    }

    /// Weighted free-capacity score used for pool selection:
    /// `free_cpu_ratio * 0.6 + free_mem_ratio * 0.4`.
    pub fn free_score(&self) -> f64 {
        let cpu_ratio = if self.total.cpu_millis == 0 {
            0.0
        } else {
            self.available().cpu_millis as f64 / self.total.cpu_millis as f64
        };
        let mem_ratio = if self.total.memory_mb == 0 {
            0.0
        } else {
            self.available().memory_mb as f64 / self.total.memory_mb as f64
        };
        cpu_ratio * 0.6 + mem_ratio * 0.4
    }
}

/// Auto-scaling bounds consumed by provisioner backends. The control plane
/// persists and serves the policy; acting on it is the backend's business.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoScalePolicy {
    pub enabled: bool,
    pub min_workers: u32,
    pub max_workers: u32,
}

/// Capacity domain hosting workers behind a provisioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub kind: PoolKind,
    pub status: PoolStatus,
    pub capacity: PoolCapacity,
    /// Maintenance flag: when false the scheduler excludes the pool
    pub allow_new_jobs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scale: Option<AutoScalePolicy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    pub fn new(name: impl Into<String>, kind: PoolKind, slots: u32) -> Self {
        let now = Utc::now();
        Self {
            id: PoolId::new(),
            name: name.into(),
            kind,
            status: PoolStatus::Active,
            capacity: PoolCapacity {
                slots_total: slots,
                ..Default::default()
            },
            allow_new_jobs: true,
            maintenance_reason: None,
            auto_scale: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduler may place new executions here.
    pub fn schedulable(&self) -> bool {
        self.status.accepts_dispatch() && self.allow_new_jobs
    }
}

impl hodei_state::Entity for Pool {
    const KIND: &'static str = "pool";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

/// Limits for one namespace. Zero means "no limit" for that axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct QuotaLimits {
    pub max_concurrent_jobs: u32,
    pub max_cpu_millis: u64,
    pub max_memory_mb: u64,
    pub max_jobs_per_hour: u32,
    pub max_jobs_per_day: u32,
}

/// Live usage counters tracked against the limits.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotaUsage {
    pub concurrent_jobs: u32,
    pub cpu_millis: u64,
    pub memory_mb: u64,
    /// Dispatch timestamps inside the rate windows (pruned on read)
    #[serde(default)]
    pub recent_dispatches: Vec<DateTime<Utc>>,
}

/// Per-namespace resource policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub id: QuotaId,
    pub namespace: String,
    pub mode: QuotaPolicyMode,
    pub limits: QuotaLimits,
    #[serde(default)]
    pub usage: QuotaUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quota {
    pub fn new(namespace: impl Into<String>, mode: QuotaPolicyMode, limits: QuotaLimits) -> Self {
        let now = Utc::now();
        Self {
            id: QuotaId::new(),
            namespace: namespace.into(),
            mode,
            limits,
            usage: QuotaUsage::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl hodei_state::Entity for Quota {
    const KIND: &'static str = "quota";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Event taxonomy. `as_str` yields the dotted wire form (`job.created`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    JobRetried,
    JobCancelled,
    JobCompleted,
    JobFailed,
    ExecutionCreated,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    WorkerRegistered,
    WorkerUnregistered,
    WorkerLost,
    PoolCreated,
    PoolUpdated,
    PoolDeleted,
    PoolDraining,
    PoolResumed,
    QuotaWarning,
    SystemStarted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobCreated => "job.created",
            EventKind::JobRetried => "job.retried",
            EventKind::JobCancelled => "job.cancelled",
            EventKind::JobCompleted => "job.completed",
            EventKind::JobFailed => "job.failed",
            EventKind::ExecutionCreated => "execution.created",
            EventKind::ExecutionStarted => "execution.started",
            EventKind::ExecutionCompleted => "execution.completed",
            EventKind::ExecutionFailed => "execution.failed",
            EventKind::ExecutionCancelled => "execution.cancelled",
            EventKind::WorkerRegistered => "worker.registered",
            EventKind::WorkerUnregistered => "worker.unregistered",
            EventKind::WorkerLost => "worker.lost",
            EventKind::PoolCreated => "pool.created",
            EventKind::PoolUpdated => "pool.updated",
            EventKind::PoolDeleted => "pool.deleted",
            EventKind::PoolDraining => "pool.draining",
            EventKind::PoolResumed => "pool.resumed",
            EventKind::QuotaWarning => "quota.warning",
            EventKind::SystemStarted => "system.started",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<PoolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            at: Utc::now(),
            kind,
            job_id: None,
            execution_id: None,
            worker_id: None,
            pool_id: None,
            payload: None,
        }
    }

    pub fn job(mut self, id: &JobId) -> Self {
        self.job_id = Some(id.clone());
        self
    }

    pub fn execution(mut self, id: &ExecutionId) -> Self {
        self.execution_id = Some(id.clone());
        self
    }

    pub fn worker(mut self, id: &WorkerId) -> Self {
        self.worker_id = Some(id.clone());
        self
    }

    pub fn pool(mut self, id: &PoolId) -> Self {
        self.pool_id = Some(id.clone());
        self
    }

    pub fn payload(mut self, value: serde_json::Value) -> Self {
        self.payload = Some(value);
        self
    }
}
