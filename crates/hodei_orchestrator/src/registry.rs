//! Worker registry: sessions, tokens, heartbeat liveness.
//!
//! Tracks connected workers independently of their executions. A session is
//! born at registration, carries an opaque token that every subsequent
//! message must present, and dies at unregistration or after three missed
//! heartbeats.

use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::metrics::METRICS;
use crate::models::{Event, EventKind};
use chrono::{DateTime, Utc};
use hodei_ids::{ExecutionId, PoolId, SessionToken, WorkerId};
use hodei_protocol::{ResourceSpec, WorkerStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

/// Live session for one connected worker.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    pub worker_id: WorkerId,
    pub name: String,
    pub pool_id: PoolId,
    pub status: WorkerStatus,
    pub capabilities: HashMap<String, String>,
    pub resources: ResourceSpec,
    pub current_execution: Option<ExecutionId>,
    pub session_token: SessionToken,
    pub last_heartbeat: Instant,
    pub registered_at: DateTime<Utc>,
}

impl WorkerSession {
    /// Capabilities superset check: every required tag must be present with
    /// the same value.
    pub fn satisfies(&self, required: &HashMap<String, String>) -> bool {
        required
            .iter()
            .all(|(key, value)| self.capabilities.get(key) == Some(value))
    }
}

pub struct WorkerRegistry {
    events: Arc<EventBus>,
    workers: Mutex<HashMap<WorkerId, WorkerSession>>,
}

impl WorkerRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or re-register) a worker. A re-registration invalidates the
    /// previous token; if the old session held an execution it is returned so
    /// the lifecycle can fail it.
    pub fn register(
        &self,
        worker_id: WorkerId,
        name: String,
        pool_id: PoolId,
        capabilities: HashMap<String, String>,
        resources: ResourceSpec,
    ) -> (SessionToken, Option<WorkerSession>) {
        let token = SessionToken::mint();
        let session = WorkerSession {
            worker_id: worker_id.clone(),
            name: name.clone(),
            pool_id: pool_id.clone(),
            status: WorkerStatus::Idle,
            capabilities,
            resources,
            current_execution: None,
            session_token: token.clone(),
            last_heartbeat: Instant::now(),
            registered_at: Utc::now(),
        };

        let previous = {
            let mut workers = self.workers.lock().expect("registry lock poisoned");
            workers.insert(worker_id.clone(), session)
        };

        if previous.is_some() {
            info!("Worker re-registered [{}], previous session invalidated", name);
        } else {
            info!("Worker joined [{}]", name);
        }
        METRICS.inc(&METRICS.workers_registered);
        self.events.publish(
            Event::new(EventKind::WorkerRegistered)
                .worker(&worker_id)
                .pool(&pool_id),
        );

        (token, previous.filter(|s| s.current_execution.is_some()))
    }

    /// Drop a session. Returns it so callers can settle leftovers.
    pub fn unregister(&self, worker_id: &WorkerId) -> Option<WorkerSession> {
        let removed = {
            let mut workers = self.workers.lock().expect("registry lock poisoned");
            workers.remove(worker_id)
        };
        if let Some(session) = &removed {
            info!("Worker left [{}]", session.name);
            self.events
                .publish(Event::new(EventKind::WorkerUnregistered).worker(worker_id));
        }
        removed
    }

    /// Validate a session token. A mismatch marks the worker ERROR: a stale
    /// or forged token means we can no longer trust anything on that channel.
    pub fn validate_token(&self, worker_id: &WorkerId, token: &SessionToken) -> Result<()> {
        let mut workers = self.workers.lock().expect("registry lock poisoned");
        let session = workers
            .get_mut(worker_id)
            .ok_or_else(|| OrchestratorError::InvalidSession(worker_id.to_string()))?;
        if session.session_token != *token {
            warn!("Rejected message with stale token from [{}]", session.name);
            session.status = WorkerStatus::Error;
            METRICS.inc(&METRICS.invalid_sessions);
            return Err(OrchestratorError::InvalidSession(worker_id.to_string()));
        }
        Ok(())
    }

    /// Record a heartbeat. The reported status is honored unless the registry
    /// knows the worker holds an execution (then it stays BUSY).
    pub fn heartbeat(
        &self,
        worker_id: &WorkerId,
        token: &SessionToken,
        reported: WorkerStatus,
    ) -> Result<()> {
        self.validate_token(worker_id, token)?;
        let mut workers = self.workers.lock().expect("registry lock poisoned");
        let session = workers
            .get_mut(worker_id)
            .ok_or_else(|| OrchestratorError::InvalidSession(worker_id.to_string()))?;
        session.last_heartbeat = Instant::now();
        if session.current_execution.is_none() && session.status != WorkerStatus::Error {
            session.status = reported;
        }
        Ok(())
    }

    /// Bind an execution to a worker (BUSY <=> current execution non-null).
    pub fn mark_busy(&self, worker_id: &WorkerId, execution_id: ExecutionId) -> Result<()> {
        let mut workers = self.workers.lock().expect("registry lock poisoned");
        let session = workers
            .get_mut(worker_id)
            .ok_or_else(|| OrchestratorError::not_found("worker", worker_id.to_string()))?;
        if let Some(existing) = &session.current_execution {
            return Err(OrchestratorError::Conflict(format!(
                "worker {} already runs execution {}",
                worker_id, existing
            )));
        }
        session.current_execution = Some(execution_id);
        session.status = WorkerStatus::Busy;
        Ok(())
    }

    /// Release a worker after its execution settled. Only flips to IDLE when
    /// the named execution is the one the worker holds.
    pub fn release(&self, worker_id: &WorkerId, execution_id: &ExecutionId) {
        let mut workers = self.workers.lock().expect("registry lock poisoned");
        if let Some(session) = workers.get_mut(worker_id) {
            if session.current_execution.as_ref() == Some(execution_id) {
                session.current_execution = None;
                if session.status == WorkerStatus::Busy {
                    session.status = WorkerStatus::Idle;
                }
            }
        }
    }

    /// Mark a worker ERROR out-of-band (cancel timeouts, invalid sessions).
    pub fn mark_error(&self, worker_id: &WorkerId) {
        let mut workers = self.workers.lock().expect("registry lock poisoned");
        if let Some(session) = workers.get_mut(worker_id) {
            session.status = WorkerStatus::Error;
        }
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<WorkerSession> {
        let workers = self.workers.lock().expect("registry lock poisoned");
        workers.get(worker_id).cloned()
    }

    pub fn list(&self) -> Vec<WorkerSession> {
        let workers = self.workers.lock().expect("registry lock poisoned");
        workers.values().cloned().collect()
    }

    /// Idle, non-errored workers of one pool.
    pub fn idle_in_pool(&self, pool_id: &PoolId) -> Vec<WorkerSession> {
        let workers = self.workers.lock().expect("registry lock poisoned");
        workers
            .values()
            .filter(|w| w.pool_id == *pool_id && w.status.is_available())
            .cloned()
            .collect()
    }

    /// Sweep: mark every worker silent for longer than `timeout` as ERROR and
    /// return the freshly-expired sessions so the lifecycle can fail their
    /// executions and the pool manager can release their resources.
    pub fn expire_stale(&self, timeout: std::time::Duration) -> Vec<WorkerSession> {
        let now = Instant::now();
        let mut expired = Vec::new();

        let mut workers = self.workers.lock().expect("registry lock poisoned");
        for session in workers.values_mut() {
            if session.status == WorkerStatus::Error || session.status.is_terminated() {
                continue;
            }
            if now.duration_since(session.last_heartbeat) > timeout {
                warn!(
                    "Worker [{}] missed heartbeats for {:?}, marking ERROR",
                    session.name,
                    now.duration_since(session.last_heartbeat)
                );
                session.status = WorkerStatus::Error;
                expired.push(session.clone());
            }
        }
        drop(workers);

        for session in &expired {
            METRICS.inc(&METRICS.workers_lost);
            self.events
                .publish(Event::new(EventKind::WorkerLost).worker(&session.worker_id));
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(EventBus::new()))
    }

    fn register_one(reg: &WorkerRegistry) -> (WorkerId, SessionToken) {
        let worker_id = WorkerId::new();
        let (token, _) = reg.register(
            worker_id.clone(),
            "w1".to_string(),
            PoolId::new(),
            HashMap::new(),
            ResourceSpec::new(1000, 1024, 0),
        );
        (worker_id, token)
    }

    #[test]
    fn test_register_and_heartbeat() {
        let reg = registry();
        let (worker_id, token) = register_one(&reg);

        reg.heartbeat(&worker_id, &token, WorkerStatus::Idle).unwrap();
        assert_eq!(reg.get(&worker_id).unwrap().status, WorkerStatus::Idle);
    }

    #[test]
    fn test_stale_token_rejected_and_marks_error() {
        let reg = registry();
        let (worker_id, _old) = register_one(&reg);
        let stale = SessionToken::mint();

        let err = reg
            .heartbeat(&worker_id, &stale, WorkerStatus::Idle)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidSession");
        assert_eq!(reg.get(&worker_id).unwrap().status, WorkerStatus::Error);
    }

    #[test]
    fn test_reregistration_invalidates_previous_token() {
        let reg = registry();
        let (worker_id, first_token) = register_one(&reg);
        let (second_token, orphaned) = reg.register(
            worker_id.clone(),
            "w1".to_string(),
            PoolId::new(),
            HashMap::new(),
            ResourceSpec::ZERO,
        );
        assert!(orphaned.is_none());
        assert_ne!(first_token, second_token);
        assert!(reg
            .heartbeat(&worker_id, &first_token, WorkerStatus::Idle)
            .is_err());
        assert!(reg
            .heartbeat(&worker_id, &second_token, WorkerStatus::Idle)
            .is_ok());
    }

    #[test]
    fn test_busy_idle_invariant() {
        let reg = registry();
        let (worker_id, _) = register_one(&reg);
        let exec = ExecutionId::new();

        reg.mark_busy(&worker_id, exec.clone()).unwrap();
        let session = reg.get(&worker_id).unwrap();
        assert_eq!(session.status, WorkerStatus::Busy);
        assert_eq!(session.current_execution, Some(exec.clone()));

        // Double-booking is a conflict.
        assert!(reg.mark_busy(&worker_id, ExecutionId::new()).is_err());

        reg.release(&worker_id, &exec);
        let session = reg.get(&worker_id).unwrap();
        assert_eq!(session.status, WorkerStatus::Idle);
        assert!(session.current_execution.is_none());
    }

    #[test]
    fn test_release_ignores_foreign_execution() {
        let reg = registry();
        let (worker_id, _) = register_one(&reg);
        let exec = ExecutionId::new();
        reg.mark_busy(&worker_id, exec.clone()).unwrap();

        reg.release(&worker_id, &ExecutionId::new());
        assert_eq!(reg.get(&worker_id).unwrap().status, WorkerStatus::Busy);
    }

    #[test]
    fn test_expire_stale() {
        let reg = registry();
        let (worker_id, _) = register_one(&reg);

        // Nothing expires with a generous timeout.
        assert!(reg.expire_stale(Duration::from_secs(60)).is_empty());

        // A zero timeout expires everyone immediately.
        let expired = reg.expire_stale(Duration::from_nanos(0));
        assert_eq!(expired.len(), 1);
        assert_eq!(reg.get(&worker_id).unwrap().status, WorkerStatus::Error);

        // Already-errored workers are not re-reported.
        assert!(reg.expire_stale(Duration::from_nanos(0)).is_empty());
    }

    #[test]
    fn test_capability_superset() {
        let reg = registry();
        let worker_id = WorkerId::new();
        let mut caps = HashMap::new();
        caps.insert("os".to_string(), "linux".to_string());
        caps.insert("runtime".to_string(), "shell".to_string());
        reg.register(
            worker_id.clone(),
            "w".to_string(),
            PoolId::new(),
            caps,
            ResourceSpec::ZERO,
        );

        let session = reg.get(&worker_id).unwrap();
        let mut required = HashMap::new();
        assert!(session.satisfies(&required));
        required.insert("os".to_string(), "linux".to_string());
        assert!(session.satisfies(&required));
        required.insert("gpu".to_string(), "cuda".to_string());
        assert!(!session.satisfies(&required));
    }
}
