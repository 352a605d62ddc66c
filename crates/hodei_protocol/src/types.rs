//! Protocol payload types and canonical status enums.
//!
//! The enums here are the single source of truth for lifecycle states across
//! all crates. Other crates never define their own copies; they convert at
//! storage boundaries via `as_str`/`FromStr`.

use hodei_ids::{ExecutionId, JobId, PoolId, SessionToken, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rejection reasons for malformed artifact ids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactIdError {
    #[error("artifact id must be 64 hex chars, got {0}")]
    BadLength(usize),
    #[error("artifact id contains non-lowercase-hex char '{0}'")]
    BadChar(char),
}

// ============================================================================
// Wire timestamp
// ============================================================================

/// Wall-clock timestamp on the wire: 64-bit seconds + 32-bit nanos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct WireTimestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl WireTimestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            secs: now.timestamp(),
            nanos: now.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.secs, self.nanos)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for WireTimestamp {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            secs: value.timestamp(),
            nanos: value.timestamp_subsec_nanos(),
        }
    }
}

// ============================================================================
// Canonical enums
// ============================================================================

/// Job priority. Higher values rank earlier in the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl JobPriority {
    pub const ALL: &'static [JobPriority] = &[
        JobPriority::Low,
        JobPriority::Normal,
        JobPriority::High,
        JobPriority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "LOW",
            JobPriority::Normal => "NORMAL",
            JobPriority::High => "HIGH",
            JobPriority::Critical => "CRITICAL",
        }
    }

    /// Fixed wire/storage integer for this priority.
    pub fn rank(&self) -> i32 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Normal => 1,
            JobPriority::High => 2,
            JobPriority::Critical => 3,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(JobPriority::Low),
            "NORMAL" => Ok(JobPriority::Normal),
            "HIGH" => Ok(JobPriority::High),
            "CRITICAL" => Ok(JobPriority::Critical),
            _ => Err(format!("Invalid job priority: '{}'", s)),
        }
    }
}

/// Job lifecycle status. Terminal states are final; every observed sequence of
/// statuses is a prefix of PENDING/QUEUED -> RUNNING -> terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Claimed by the scheduler, assignment in flight
    #[default]
    Pending,
    /// Waiting in the queue for a worker
    Queued,
    /// An execution for this job is running
    Running,
    /// Finished successfully
    Completed,
    /// Exhausted retries or failed terminally
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal forward transitions in the job state diagram.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Pending)
                | (Queued, Cancelled)
                | (Pending, Running)
                | (Pending, Queued)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: '{}'", s)),
        }
    }
}

/// Execution lifecycle status. One job may produce several executions; each
/// execution moves PENDING -> RUNNING -> terminal exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub const ALL: &'static [ExecutionStatus] = &[
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(ExecutionStatus::Cancelled),
            _ => Err(format!("Invalid execution status: '{}'", s)),
        }
    }
}

/// Worker status for heartbeats and tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Being brought up by a provisioner
    Provisioning,
    /// Ready for a dispatch
    #[default]
    Idle,
    /// Holds a running execution
    Busy,
    /// Finishing current work, not accepting new dispatches
    Draining,
    /// Operator-flagged, excluded from scheduling
    Maintenance,
    /// Shutdown requested
    Terminating,
    /// Gone for good
    Terminated,
    /// Missed heartbeats or invalid session
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Provisioning => "PROVISIONING",
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Busy => "BUSY",
            WorkerStatus::Draining => "DRAINING",
            WorkerStatus::Maintenance => "MAINTENANCE",
            WorkerStatus::Terminating => "TERMINATING",
            WorkerStatus::Terminated => "TERMINATED",
            WorkerStatus::Error => "ERROR",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, WorkerStatus::Idle)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, WorkerStatus::Terminated)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PROVISIONING" => Ok(WorkerStatus::Provisioning),
            "IDLE" => Ok(WorkerStatus::Idle),
            "BUSY" => Ok(WorkerStatus::Busy),
            "DRAINING" => Ok(WorkerStatus::Draining),
            "MAINTENANCE" => Ok(WorkerStatus::Maintenance),
            "TERMINATING" => Ok(WorkerStatus::Terminating),
            "TERMINATED" => Ok(WorkerStatus::Terminated),
            "ERROR" => Ok(WorkerStatus::Error),
            _ => Err(format!("Invalid worker status: '{}'", s)),
        }
    }
}

/// Pool lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Provisioning,
    #[default]
    Active,
    Draining,
    Maintenance,
    Error,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Provisioning => "PROVISIONING",
            PoolStatus::Active => "ACTIVE",
            PoolStatus::Draining => "DRAINING",
            PoolStatus::Maintenance => "MAINTENANCE",
            PoolStatus::Error => "ERROR",
        }
    }

    /// A DRAINING or errored pool accepts no new executions.
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, PoolStatus::Active)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PoolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PROVISIONING" => Ok(PoolStatus::Provisioning),
            "ACTIVE" => Ok(PoolStatus::Active),
            "DRAINING" => Ok(PoolStatus::Draining),
            "MAINTENANCE" => Ok(PoolStatus::Maintenance),
            "ERROR" => Ok(PoolStatus::Error),
            _ => Err(format!("Invalid pool status: '{}'", s)),
        }
    }
}

/// Provisioner backend behind a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Kubernetes,
    Docker,
    Vm,
    BareMetal,
    /// In-process workers, used by tests and single-node setups
    #[default]
    Local,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Kubernetes => "kubernetes",
            PoolKind::Docker => "docker",
            PoolKind::Vm => "vm",
            PoolKind::BareMetal => "bare_metal",
            PoolKind::Local => "local",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(PoolKind::Kubernetes),
            "docker" => Ok(PoolKind::Docker),
            "vm" => Ok(PoolKind::Vm),
            "bare_metal" | "baremetal" => Ok(PoolKind::BareMetal),
            "local" => Ok(PoolKind::Local),
            _ => Err(format!("Invalid pool kind: '{}'", s)),
        }
    }
}

/// How quota limit violations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaPolicyMode {
    /// Violations block admission
    #[default]
    Enforce,
    /// Violations admit but emit a warning event
    Warn,
    /// Usage is recorded, limits are not consulted
    Monitor,
}

impl QuotaPolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaPolicyMode::Enforce => "ENFORCE",
            QuotaPolicyMode::Warn => "WARN",
            QuotaPolicyMode::Monitor => "MONITOR",
        }
    }
}

impl fmt::Display for QuotaPolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compression applied to artifact chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
}

impl Compression {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            _ => None,
        }
    }
}

/// Which stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

// ============================================================================
// Resource units
// ============================================================================

/// Resource request/capacity in integral units (milli-cores / MB) so
/// reservation arithmetic never touches floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceSpec {
    pub cpu_millis: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

impl ResourceSpec {
    pub const ZERO: ResourceSpec = ResourceSpec {
        cpu_millis: 0,
        memory_mb: 0,
        disk_mb: 0,
    };

    pub fn new(cpu_millis: u64, memory_mb: u64, disk_mb: u64) -> Self {
        Self {
            cpu_millis,
            memory_mb,
            disk_mb,
        }
    }

    pub fn fits_within(&self, available: &ResourceSpec) -> bool {
        self.cpu_millis <= available.cpu_millis
            && self.memory_mb <= available.memory_mb
            && self.disk_mb <= available.disk_mb
    }

    pub fn saturating_add(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
            disk_mb: self.disk_mb.saturating_add(other.disk_mb),
        }
    }

    pub fn saturating_sub(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_mb: self.disk_mb.saturating_sub(other.disk_mb),
        }
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} cores / {} MB mem / {} MB disk",
            self.cpu_millis as f64 / 1000.0,
            self.memory_mb,
            self.disk_mb
        )
    }
}

// ============================================================================
// Job definition pieces (shared by submission and dispatch)
// ============================================================================

/// What the worker actually runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobContent {
    /// A list of shell commands, run in order, stop on first failure
    Shell { commands: Vec<String> },
    /// A single script executed through the shell
    Script { text: String },
}

impl JobContent {
    pub fn is_empty(&self) -> bool {
        match self {
            JobContent::Shell { commands } => {
                commands.iter().all(|c| c.trim().is_empty())
            }
            JobContent::Script { text } => text.trim().is_empty(),
        }
    }
}

/// Retry policy carried by every job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_secs: crate::defaults::DEFAULT_RETRY_BASE_DELAY_SECS,
            multiplier: crate::defaults::DEFAULT_RETRY_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry attempt (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(16) as i32);
        let secs = (self.base_delay_secs as f64 * factor).min(86_400.0);
        std::time::Duration::from_secs_f64(secs)
    }
}

/// Artifact required by a job, by content address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Lowercase hex SHA-256 of the uncompressed bytes
    pub id: String,
    pub name: String,
    pub size: u64,
}

// ============================================================================
// Worker -> server payloads
// ============================================================================

/// Payload for OpCode::Register.
/// Worker -> Server: handshake with capabilities and resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub worker_id: WorkerId,
    pub name: String,
    pub pool_id: PoolId,
    /// Declared capability tags (platform, runtimes); matched against job
    /// requirements as a superset check.
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
    pub resources: ResourceSpec,
}

/// Payload for OpCode::Heartbeat.
/// Worker -> Server: liveness plus current load; carries the session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub session_token: SessionToken,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_executions: Vec<ExecutionId>,
}

/// Payload for OpCode::StatusUpdate.
/// Worker -> Server: execution phase change. The first RUNNING update closes
/// the dispatch window; terminal updates settle the execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub session_token: SessionToken,
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produced_artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, i64>,
}

/// Payload for OpCode::LogChunk.
/// Worker -> Server: one log line from a running execution. Best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunkPayload {
    pub session_token: SessionToken,
    pub execution_id: ExecutionId,
    pub stream: LogStream,
    pub at: WireTimestamp,
    pub line: String,
}

/// Payload for OpCode::ArtifactAck.
/// Worker -> Server: per-artifact transfer outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactAckPayload {
    pub session_token: SessionToken,
    pub execution_id: ExecutionId,
    pub artifact_id: String,
    pub success: bool,
    /// True when the artifact was already present and no bytes moved
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One entry of a cache membership reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub artifact_id: String,
    pub cached: bool,
}

/// Payload for OpCode::CacheResponse.
/// Worker -> Server: answers a CacheQuery for the same execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheResponsePayload {
    pub session_token: SessionToken,
    pub execution_id: ExecutionId,
    pub entries: Vec<CacheEntry>,
}

// ============================================================================
// Server -> worker payloads
// ============================================================================

/// Payload for OpCode::Registered.
/// Server -> Worker: handshake result. On rejection `session_token` is absent
/// and the worker must not send further messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredPayload {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<SessionToken>,
    pub heartbeat_interval_secs: u64,
}

/// Payload for OpCode::JobRequest.
/// Server -> Worker: "run this job as execution X". Required artifacts are
/// shipped beforehand via CacheQuery / ArtifactChunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequestPayload {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
    pub job_name: String,
    pub content: JobContent,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_artifacts: Vec<ArtifactRef>,
}

/// Payload for OpCode::CacheQuery.
/// Server -> Worker: bulk membership probe ahead of a JobRequest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheQueryPayload {
    pub execution_id: ExecutionId,
    pub artifact_ids: Vec<String>,
}

/// Payload for OpCode::CancelJob.
/// Server -> Worker: stop an execution. The worker must answer with a
/// terminal StatusUpdate within the cancellation grace period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobPayload {
    pub execution_id: ExecutionId,
    pub force: bool,
    pub reason: String,
}

/// Payload for OpCode::Shutdown.
/// Server -> Worker: drain and exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownPayload {
    pub reason: String,
    pub deadline_secs: u64,
}

/// Artifact ids are lowercase hex SHA-256 digests (64 chars).
pub fn validate_artifact_id(id: &str) -> Result<(), ArtifactIdError> {
    if id.len() != 64 {
        return Err(ArtifactIdError::BadLength(id.len()));
    }
    if let Some(bad) = id.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
        return Err(ArtifactIdError::BadChar(bad));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert_eq!(JobPriority::Critical.rank(), 3);
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_terminal_states() {
        for status in JobStatus::ALL {
            let expect = matches!(
                status,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            );
            assert_eq!(status.is_terminal(), expect, "{status}");
        }
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_secs: 30,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0).as_secs(), 30);
        assert_eq!(policy.delay_for_attempt(1).as_secs(), 60);
        assert_eq!(policy.delay_for_attempt(2).as_secs(), 120);
    }

    #[test]
    fn test_resource_fits() {
        let req = ResourceSpec::new(500, 512, 0);
        let free = ResourceSpec::new(1000, 1024, 100);
        assert!(req.fits_within(&free));
        assert!(!free.fits_within(&req));
        assert_eq!(
            free.saturating_sub(&req),
            ResourceSpec::new(500, 512, 100)
        );
    }

    #[test]
    fn test_validate_artifact_id() {
        let good = "a".repeat(64);
        assert!(validate_artifact_id(&good).is_ok());
        assert!(validate_artifact_id("abc").is_err());
        let upper = "A".repeat(64);
        assert!(validate_artifact_id(&upper).is_err());
    }

    #[test]
    fn test_status_serde_screaming_case() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let parsed: ExecutionStatus = serde_json::from_str("\"SUCCESS\"").unwrap();
        assert_eq!(parsed, ExecutionStatus::Success);
    }

    #[test]
    fn test_job_content_empty() {
        assert!(JobContent::Shell { commands: vec![] }.is_empty());
        assert!(JobContent::Script {
            text: "  ".to_string()
        }
        .is_empty());
        assert!(!JobContent::Shell {
            commands: vec!["echo ok".to_string()]
        }
        .is_empty());
    }
}
