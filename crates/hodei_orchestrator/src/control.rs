//! Control-plane API for operators.
//!
//! A ZMQ REP socket speaking JSON request/response envelopes over the core
//! facade, so the CLI (and any other adapter) can query and mutate
//! orchestrator state without linking the control plane in-process.

use crate::error::OrchestratorError;
use crate::facade::{CoreFacade, QueueStats};
use crate::lifecycle::LogEntry;
use crate::metrics::METRICS;
use crate::models::{Event, Execution, Job, JobDefinition, Pool, Quota, QuotaLimits};
use crate::registry::WorkerSession;
use hodei_ids::{ExecutionId, JobId, PoolId, WorkerId};
use hodei_protocol::{ExecutionStatus, JobStatus, PoolKind, QuotaPolicyMode, WorkerStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Control API request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlRequest {
    Ping,

    // Jobs
    SubmitJob { definition: JobDefinition },
    GetJob { job_id: JobId },
    ListJobs {
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    CancelJob {
        job_id: JobId,
        reason: Option<String>,
        force: bool,
    },
    RetryJob { job_id: JobId },
    GetQueueStats,

    // Executions
    GetExecution { execution_id: ExecutionId },
    ListExecutions { job_id: Option<JobId> },
    CancelExecution {
        execution_id: ExecutionId,
        reason: Option<String>,
        force: bool,
    },
    GetExecutionLogs { execution_id: ExecutionId },
    GetExecutionEvents { execution_id: ExecutionId },

    // Workers
    ListWorkers,
    GetWorker { worker_id: WorkerId },
    UnregisterWorker { worker_id: WorkerId },

    // Pools
    ListPools,
    CreatePool {
        name: String,
        kind: PoolKind,
        slots: u32,
    },
    UpdatePool {
        pool_id: PoolId,
        name: Option<String>,
        slots: Option<u32>,
    },
    DeletePool { pool_id: PoolId },
    DrainPool {
        pool_id: PoolId,
        timeout_secs: u64,
        force: bool,
    },
    ResumePool { pool_id: PoolId },
    SetMaintenance {
        pool_id: PoolId,
        reason: String,
        allow_new_jobs: bool,
    },

    // Quotas
    ListQuotas,
    SetQuota {
        namespace: String,
        mode: QuotaPolicyMode,
        limits: QuotaLimits,
    },
    DeleteQuota { namespace: String },

    // Observability
    GetMetrics,
}

/// Worker information for API responses (sessions themselves hold a
/// monotonic clock and never serialize).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub name: String,
    pub pool_id: PoolId,
    pub status: WorkerStatus,
    pub current_execution: Option<ExecutionId>,
    pub last_heartbeat_secs_ago: u64,
}

impl From<WorkerSession> for WorkerInfo {
    fn from(session: WorkerSession) -> Self {
        Self {
            worker_id: session.worker_id,
            name: session.name,
            pool_id: session.pool_id,
            status: session.status,
            current_execution: session.current_execution,
            last_heartbeat_secs_ago: session.last_heartbeat.elapsed().as_secs(),
        }
    }
}

/// Control API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlResponse {
    Pong,
    Ok { message: String },
    Error { kind: String, message: String },

    Job(Box<Job>),
    Jobs(Vec<Job>),
    JobCancelled { status: JobStatus },
    QueueStats(QueueStats),

    Execution(Box<Execution>),
    Executions(Vec<Execution>),
    ExecutionCancelled { status: ExecutionStatus },
    Logs(Vec<LogEntry>),
    Events(Vec<Event>),

    Workers(Vec<WorkerInfo>),
    Worker(Box<WorkerInfo>),

    Pool(Box<Pool>),
    Pools(Vec<Pool>),

    Quota(Box<Quota>),
    Quotas(Vec<Quota>),

    Metrics { prometheus: String },
}

impl ControlResponse {
    pub fn error_from(err: &OrchestratorError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Dispatch one control request against the facade.
pub async fn handle_control_request(
    facade: &CoreFacade,
    request: ControlRequest,
) -> ControlResponse {
    let result = dispatch(facade, request).await;
    match result {
        Ok(response) => response,
        Err(err) => ControlResponse::error_from(&err),
    }
}

async fn dispatch(
    facade: &CoreFacade,
    request: ControlRequest,
) -> crate::error::Result<ControlResponse> {
    use ControlRequest::*;
    Ok(match request {
        Ping => ControlResponse::Pong,

        SubmitJob { definition } => {
            ControlResponse::Job(Box::new(facade.submit_job(definition).await?))
        }
        GetJob { job_id } => ControlResponse::Job(Box::new(facade.get_job(&job_id)?)),
        ListJobs {
            status,
            limit,
            offset,
        } => ControlResponse::Jobs(facade.list_jobs(
            status,
            limit.unwrap_or(100),
            offset.unwrap_or(0),
        )),
        CancelJob {
            job_id,
            reason,
            force,
        } => {
            let reason = reason
                .unwrap_or_else(|| hodei_protocol::defaults::CANCELLED_BY_USER_MESSAGE.to_string());
            let status = facade.cancel_job(&job_id, &reason, force).await?;
            ControlResponse::JobCancelled { status }
        }
        RetryJob { job_id } => ControlResponse::Job(Box::new(facade.retry_job(&job_id).await?)),
        GetQueueStats => ControlResponse::QueueStats(facade.queue_stats()),

        GetExecution { execution_id } => {
            ControlResponse::Execution(Box::new(facade.get_execution(&execution_id)?))
        }
        ListExecutions { job_id } => {
            ControlResponse::Executions(facade.list_executions(job_id.as_ref()))
        }
        CancelExecution {
            execution_id,
            reason,
            force,
        } => {
            let reason = reason
                .unwrap_or_else(|| hodei_protocol::defaults::CANCELLED_BY_USER_MESSAGE.to_string());
            let status = facade.cancel_execution(&execution_id, &reason, force).await?;
            ControlResponse::ExecutionCancelled { status }
        }
        GetExecutionLogs { execution_id } => {
            let (history, _rx) = facade.subscribe_logs(&execution_id, None)?;
            ControlResponse::Logs(history)
        }
        GetExecutionEvents { execution_id } => {
            ControlResponse::Events(facade.replay_events(&execution_id)?)
        }

        ListWorkers => ControlResponse::Workers(
            facade.list_workers().into_iter().map(WorkerInfo::from).collect(),
        ),
        GetWorker { worker_id } => {
            ControlResponse::Worker(Box::new(facade.get_worker(&worker_id)?.into()))
        }
        UnregisterWorker { worker_id } => {
            facade.unregister_worker(&worker_id).await?;
            ControlResponse::Ok {
                message: format!("worker {worker_id} unregistered"),
            }
        }

        ListPools => ControlResponse::Pools(facade.list_pools()),
        CreatePool { name, kind, slots } => {
            ControlResponse::Pool(Box::new(facade.create_pool(&name, kind, slots).await?))
        }
        UpdatePool {
            pool_id,
            name,
            slots,
        } => ControlResponse::Pool(Box::new(
            facade.update_pool(&pool_id, name.as_deref(), slots).await?,
        )),
        DeletePool { pool_id } => {
            facade.delete_pool(&pool_id).await?;
            ControlResponse::Ok {
                message: format!("pool {pool_id} deleted"),
            }
        }
        DrainPool {
            pool_id,
            timeout_secs,
            force,
        } => ControlResponse::Pool(Box::new(
            facade
                .drain_pool(&pool_id, std::time::Duration::from_secs(timeout_secs), force)
                .await?,
        )),
        ResumePool { pool_id } => {
            ControlResponse::Pool(Box::new(facade.resume_pool(&pool_id).await?))
        }
        SetMaintenance {
            pool_id,
            reason,
            allow_new_jobs,
        } => ControlResponse::Pool(Box::new(
            facade.set_maintenance(&pool_id, &reason, allow_new_jobs).await?,
        )),

        ListQuotas => ControlResponse::Quotas(facade.list_quotas()),
        SetQuota {
            namespace,
            mode,
            limits,
        } => ControlResponse::Quota(Box::new(facade.set_quota(&namespace, mode, limits).await?)),
        DeleteQuota { namespace } => {
            facade.delete_quota(&namespace).await?;
            ControlResponse::Ok {
                message: format!("quota for '{namespace}' deleted"),
            }
        }

        GetMetrics => ControlResponse::Metrics {
            prometheus: METRICS.prometheus_format(),
        },
    })
}

/// Run the control API REP loop.
pub async fn run_control_api(
    facade: Arc<CoreFacade>,
    bind_addr: &str,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    use zeromq::{Socket, SocketRecv, SocketSend};

    let mut socket = zeromq::RepSocket::new();
    socket.bind(bind_addr).await?;
    info!("Control API bound to {}", bind_addr);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Control API shutting down");
                    return Ok(());
                }
            }
            incoming = socket.recv() => {
                let message = match incoming {
                    Ok(message) => message,
                    Err(err) => {
                        error!("Control recv failed: {}", err);
                        continue;
                    }
                };
                let bytes: Vec<u8> = message
                    .into_vec()
                    .first()
                    .map(|frame| frame.to_vec())
                    .unwrap_or_default();
                let response = match serde_json::from_slice::<ControlRequest>(&bytes) {
                    Ok(request) => handle_control_request(&facade, request).await,
                    Err(err) => {
                        warn!("Malformed control request: {}", err);
                        ControlResponse::Error {
                            kind: "ValidationFailed".to_string(),
                            message: format!("invalid request: {err}"),
                        }
                    }
                };
                let reply = serde_json::to_vec(&response)
                    .unwrap_or_else(|_| b"{\"type\":\"Error\"}".to_vec());
                if let Err(err) = socket.send(reply.into()).await {
                    error!("Control send failed: {}", err);
                }
            }
        }
    }
}
