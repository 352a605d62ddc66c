//! Control-plane error types.
//!
//! Every fallible operation returns `Result<T, OrchestratorError>`; the
//! variant is the semantic error kind surfaced to callers, alongside a
//! human-readable message. Internal faults get a trace id so operators can
//! correlate a user-visible failure with the log line that carries context.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Quota exceeded for namespace '{namespace}': {detail}")]
    QuotaExceeded { namespace: String, detail: String },

    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("Worker disconnected: {0}")]
    WorkerDisconnected(String),

    #[error("Dispatch timeout: {0}")]
    DispatchTimeout(String),

    #[error("Cancel timeout: {0}")]
    CancelTimeout(String),

    #[error("Invalid session token for worker {0}")]
    InvalidSession(String),

    #[error("Corrupt artifact {artifact_id}: {detail}")]
    CorruptArtifact { artifact_id: String, detail: String },

    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Internal error [{trace_id}]: {message}")]
    Internal { trace_id: String, message: String },
}

impl OrchestratorError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            trace_id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
        }
    }

    /// Stable kind tag for API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound { .. } => "NotFound",
            OrchestratorError::Conflict(_) => "Conflict",
            OrchestratorError::QuotaExceeded { .. } => "QuotaExceeded",
            OrchestratorError::CapacityExhausted(_) => "CapacityExhausted",
            OrchestratorError::WorkerDisconnected(_) => "WorkerDisconnected",
            OrchestratorError::DispatchTimeout(_) => "DispatchTimeout",
            OrchestratorError::CancelTimeout(_) => "CancelTimeout",
            OrchestratorError::InvalidSession(_) => "InvalidSession",
            OrchestratorError::CorruptArtifact { .. } => "CorruptArtifact",
            OrchestratorError::RegistrationRejected(_) => "RegistrationRejected",
            OrchestratorError::ValidationFailed(_) => "ValidationFailed",
            OrchestratorError::Internal { .. } => "InternalError",
        }
    }

    /// Whether the scheduler may retry the operation on a later tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CapacityExhausted(_) | OrchestratorError::QuotaExceeded { .. }
        )
    }
}

impl From<hodei_state::StateError> for OrchestratorError {
    fn from(err: hodei_state::StateError) -> Self {
        Self::internal(format!("state store: {err}"))
    }
}

impl From<hodei_protocol::ProtocolError> for OrchestratorError {
    fn from(err: hodei_protocol::ProtocolError) -> Self {
        Self::internal(format!("protocol: {err}"))
    }
}

impl From<hodei_cache::CacheError> for OrchestratorError {
    fn from(err: hodei_cache::CacheError) -> Self {
        match err {
            hodei_cache::CacheError::CorruptArtifact { artifact_id, actual } => {
                Self::CorruptArtifact {
                    artifact_id,
                    detail: format!("content hashes to {actual}"),
                }
            }
            other => Self::internal(format!("artifact cache: {other}")),
        }
    }
}
