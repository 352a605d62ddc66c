//! Canonical default values shared across the control plane.

pub const DEFAULT_ORCHESTRATOR_BIND_ADDR: &str = "tcp://127.0.0.1:7465";
pub const DEFAULT_CONTROL_ADDR: &str = "tcp://127.0.0.1:7466";

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MISSED_HEARTBEATS_BEFORE_ERROR: u32 = 3;
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 30;
pub const DEFAULT_ARTIFACT_CHUNK_BYTES: usize = 64 * 1024;
pub const MIN_ARTIFACT_CHUNK_BYTES: usize = 1024;
pub const MAX_ARTIFACT_CHUNK_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_SEND_BUFFER_MESSAGES: usize = 256;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 30;
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_LOG_RETENTION_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_EVENT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 60 * 60;
pub const MAX_JOB_TIMEOUT_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_ARTIFACT_TRANSFER_TIMEOUT_SECS: u64 = 10 * 60;
pub const ARTIFACT_TRANSFER_MAX_ATTEMPTS: u32 = 3;

pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";
