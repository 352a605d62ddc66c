//! Orchestrator configuration.

use hodei_protocol::defaults;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning knobs for the control plane. Defaults match the protocol crate's
/// canonical values; tests shrink the timers.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// ZMQ ROUTER bind address for workers
    pub bind_addr: String,
    /// Optional control API bind address (REP). None disables the API.
    pub control_addr: Option<String>,
    /// State store URL (sqlite:/path or ":memory:")
    pub state_store_url: String,
    /// Artifact cache root directory
    pub cache_dir: PathBuf,

    pub heartbeat_interval: Duration,
    pub missed_heartbeats_before_error: u32,
    pub dispatch_timeout: Duration,
    pub cancel_grace: Duration,
    pub artifact_chunk_bytes: usize,
    pub artifact_transfer_timeout: Duration,
    pub send_buffer_messages: usize,
    pub log_retention: Duration,
    pub event_retention: Duration,
    /// Upper bound on the scheduler's no-work sleep
    pub scheduler_max_sleep: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind_addr: defaults::DEFAULT_ORCHESTRATOR_BIND_ADDR.to_string(),
            control_addr: Some(defaults::DEFAULT_CONTROL_ADDR.to_string()),
            state_store_url: "sqlite:hodei_state.db".to_string(),
            cache_dir: PathBuf::from("artifact-cache"),
            heartbeat_interval: Duration::from_secs(defaults::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            missed_heartbeats_before_error: defaults::DEFAULT_MISSED_HEARTBEATS_BEFORE_ERROR,
            dispatch_timeout: Duration::from_secs(defaults::DEFAULT_DISPATCH_TIMEOUT_SECS),
            cancel_grace: Duration::from_secs(defaults::DEFAULT_CANCEL_GRACE_SECS),
            artifact_chunk_bytes: defaults::DEFAULT_ARTIFACT_CHUNK_BYTES,
            artifact_transfer_timeout: Duration::from_secs(
                defaults::DEFAULT_ARTIFACT_TRANSFER_TIMEOUT_SECS,
            ),
            send_buffer_messages: defaults::DEFAULT_SEND_BUFFER_MESSAGES,
            log_retention: Duration::from_secs(defaults::DEFAULT_LOG_RETENTION_SECS),
            event_retention: Duration::from_secs(defaults::DEFAULT_EVENT_RETENTION_SECS),
            scheduler_max_sleep: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    /// A worker missing this many seconds of heartbeats is lost.
    pub fn worker_timeout(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats_before_error
    }

    /// Liveness sweep period: half the heartbeat interval.
    pub fn sweep_interval(&self) -> Duration {
        self.heartbeat_interval / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_line_up_with_protocol() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.worker_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.artifact_chunk_bytes, 65_536);
        assert_eq!(config.send_buffer_messages, 256);
    }
}
