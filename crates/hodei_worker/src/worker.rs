//! Worker agent: handshake, heartbeats, artifact cache, job execution.
//!
//! The socket is owned by the main event loop; job tasks talk to it through
//! an internal channel, so outbound frames stay FIFO and sequence numbers
//! are stamped in send order.

use crate::cancel::CancellationToken;
use crate::runner::{self, OutputLine, RunOutcome};
use anyhow::{bail, Context, Result};
use hodei_cache::{assemble_from_chunks, ArtifactStore};
use hodei_ids::{ExecutionId, PoolId, SessionToken, WorkerId};
use hodei_protocol::{
    ArtifactAckPayload, ArtifactChunk, CacheEntry, CacheQueryPayload, CacheResponsePayload,
    CancelJobPayload, ExecutionStatus, Frame, HeartbeatPayload, JobRequestPayload,
    LogChunkPayload, OpCode, RegisterPayload, RegisteredPayload, ResourceSpec, ShutdownPayload,
    StatusUpdatePayload, WireTimestamp, WorkerStatus,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker configuration (plain data).
pub struct WorkerConfig {
    pub orchestrator_addr: String,
    pub worker_id: WorkerId,
    pub name: String,
    pub pool_id: PoolId,
    pub capabilities: HashMap<String, String>,
    pub resources: ResourceSpec,
    pub cache_dir: PathBuf,
}

/// Messages from job tasks back to the socket loop.
enum FromJob {
    Frame { opcode: OpCode, payload: Vec<u8> },
    Done(ExecutionId),
}

struct ActiveJob {
    execution_id: ExecutionId,
    cancel: CancellationToken,
}

/// Connected worker with a completed handshake.
pub struct Worker {
    config: WorkerConfig,
    socket: DealerSocket,
    cache: ArtifactStore,
    session_token: SessionToken,
    heartbeat_interval: Duration,
    seq: u64,
    active: Option<ActiveJob>,
    /// In-flight artifact transfers: chunks collected per artifact id
    transfers: HashMap<String, Vec<ArtifactChunk>>,
    /// Execution the current transfer round belongs to (set by CacheQuery)
    transfer_execution: Option<ExecutionId>,
    job_tx: mpsc::Sender<FromJob>,
    job_rx: mpsc::Receiver<FromJob>,
    running: bool,
}

impl Worker {
    /// Connect and perform the Register/Registered handshake. Fails if the
    /// orchestrator rejects the registration or stays silent.
    pub async fn connect(config: WorkerConfig) -> Result<Self> {
        let cache = ArtifactStore::open(&config.cache_dir)
            .context("Failed to open local artifact cache")?;

        let mut socket = DealerSocket::new();
        socket
            .connect(&config.orchestrator_addr)
            .await
            .with_context(|| format!("Failed to connect to {}", config.orchestrator_addr))?;
        info!("Connected to orchestrator: {}", config.orchestrator_addr);

        let register = RegisterPayload {
            worker_id: config.worker_id.clone(),
            name: config.name.clone(),
            pool_id: config.pool_id.clone(),
            capabilities: config.capabilities.clone(),
            resources: config.resources,
        };
        let frame = Frame::json(OpCode::Register, 0, &register)?;
        send_frame(&mut socket, frame).await?;
        info!("Sent Register as [{}]", config.name);

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, recv_frame(&mut socket))
            .await
            .context("Handshake timed out")??;
        if reply.header.opcode != OpCode::Registered {
            bail!("Expected Registered, got {:?}", reply.header.opcode);
        }
        let registered: RegisteredPayload = reply.decode()?;
        if !registered.success {
            bail!("Registration rejected: {}", registered.message);
        }
        let session_token = registered
            .session_token
            .context("Registered reply missing session token")?;
        info!(
            "Registered; heartbeat every {}s",
            registered.heartbeat_interval_secs
        );

        let (job_tx, job_rx) = mpsc::channel(256);
        Ok(Self {
            config,
            socket,
            cache,
            session_token,
            heartbeat_interval: Duration::from_secs(registered.heartbeat_interval_secs.max(1)),
            seq: 1,
            active: None,
            transfers: HashMap::new(),
            transfer_execution: None,
            job_tx,
            job_rx,
            running: false,
        })
    }

    /// Main event loop: inbound frames, job-task frames, heartbeat ticks.
    pub async fn run(&mut self) -> Result<()> {
        self.running = true;
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Entering event loop as [{}]", self.config.name);

        while self.running {
            tokio::select! {
                incoming = self.socket.recv() => {
                    match incoming {
                        Ok(message) => {
                            match unpack_message(message) {
                                Ok(frame) => {
                                    if let Err(err) = self.handle_frame(frame).await {
                                        error!("Error handling frame: {}", err);
                                    }
                                }
                                Err(err) => warn!("Dropping malformed frame: {}", err),
                            }
                        }
                        Err(err) => {
                            error!("Socket recv failed: {}", err);
                            break;
                        }
                    }
                }

                Some(from_job) = self.job_rx.recv() => {
                    match from_job {
                        FromJob::Frame { opcode, payload } => {
                            self.send(opcode, payload).await?;
                        }
                        FromJob::Done(execution_id) => {
                            if self.active.as_ref().is_some_and(|a| a.execution_id == execution_id) {
                                self.active = None;
                            }
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    self.send_heartbeat().await?;
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    async fn send(&mut self, opcode: OpCode, payload: Vec<u8>) -> Result<()> {
        let frame = Frame::new(opcode, self.seq, payload)?;
        self.seq += 1;
        send_frame(&mut self.socket, frame).await
    }

    async fn send_json<T: serde::Serialize>(&mut self, opcode: OpCode, payload: &T) -> Result<()> {
        self.send(opcode, serde_json::to_vec(payload)?).await
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let status = if self.active.is_some() {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        };
        let payload = HeartbeatPayload {
            session_token: self.session_token.clone(),
            status,
            active_executions: self
                .active
                .as_ref()
                .map(|a| vec![a.execution_id.clone()])
                .unwrap_or_default(),
        };
        self.send_json(OpCode::Heartbeat, &payload).await
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.header.opcode {
            OpCode::CacheQuery => {
                let query: CacheQueryPayload = frame.decode()?;
                self.handle_cache_query(query).await
            }
            OpCode::ArtifactChunk => {
                let chunk = frame.decode_chunk()?;
                self.handle_artifact_chunk(chunk).await
            }
            OpCode::JobRequest => {
                let request: JobRequestPayload = frame.decode()?;
                self.handle_job_request(request).await
            }
            OpCode::CancelJob => {
                let cancel: CancelJobPayload = frame.decode()?;
                self.handle_cancel(cancel)
            }
            OpCode::Shutdown => {
                let shutdown: ShutdownPayload = frame.decode()?;
                warn!("Shutdown requested: {}", shutdown.reason);
                if let Some(active) = &self.active {
                    active.cancel.cancel(shutdown.reason, true);
                }
                self.running = false;
                Ok(())
            }
            other => {
                warn!("Unhandled opcode: {:?}", other);
                Ok(())
            }
        }
    }

    /// Answer a cache probe, acking cache hits eagerly so the server gets
    /// exactly one ack per artifact.
    async fn handle_cache_query(&mut self, query: CacheQueryPayload) -> Result<()> {
        let entries: Vec<CacheEntry> = query
            .artifact_ids
            .iter()
            .map(|id| CacheEntry {
                artifact_id: id.clone(),
                cached: self.cache.contains(id),
            })
            .collect();
        debug!(
            "Cache probe for {}: {}/{} hits",
            query.execution_id,
            entries.iter().filter(|e| e.cached).count(),
            entries.len()
        );

        self.transfer_execution = Some(query.execution_id.clone());
        let response = CacheResponsePayload {
            session_token: self.session_token.clone(),
            execution_id: query.execution_id.clone(),
            entries: entries.clone(),
        };
        self.send_json(OpCode::CacheResponse, &response).await?;

        for entry in entries.into_iter().filter(|e| e.cached) {
            let ack = ArtifactAckPayload {
                session_token: self.session_token.clone(),
                execution_id: query.execution_id.clone(),
                artifact_id: entry.artifact_id,
                success: true,
                cache_hit: true,
                message: None,
            };
            self.send_json(OpCode::ArtifactAck, &ack).await?;
        }
        Ok(())
    }

    /// Collect chunks; on the final one, reassemble, verify the content
    /// hash, and ack. A hash mismatch acks failure so the server can retry.
    async fn handle_artifact_chunk(&mut self, chunk: ArtifactChunk) -> Result<()> {
        let artifact_id = chunk.artifact_id.clone();
        let is_last = chunk.is_last;
        // A seq-0 chunk starts a fresh attempt, discarding any half-finished
        // buffer from a failed previous round.
        if chunk.seq == 0 {
            self.transfers.insert(artifact_id.clone(), Vec::new());
        }
        self.transfers
            .entry(artifact_id.clone())
            .or_default()
            .push(chunk);

        if !is_last {
            return Ok(());
        }

        let chunks = self.transfers.remove(&artifact_id).unwrap_or_default();
        let Some(execution_id) = self.transfer_execution.clone() else {
            warn!("Chunk stream finished with no transfer in progress");
            return Ok(());
        };

        let (success, message) = match assemble_from_chunks(chunks) {
            Ok((id, bytes)) => match self.cache.put(&bytes) {
                Ok(stored) if stored == id => (true, None),
                Ok(stored) => (
                    false,
                    Some(format!("stored id {stored} does not match {id}")),
                ),
                Err(err) => (false, Some(format!("cache write failed: {err}"))),
            },
            Err(err) => {
                warn!("Artifact {} failed verification: {}", &artifact_id[..12], err);
                (false, Some(err.to_string()))
            }
        };

        let ack = ArtifactAckPayload {
            session_token: self.session_token.clone(),
            execution_id,
            artifact_id,
            success,
            cache_hit: false,
            message,
        };
        self.send_json(OpCode::ArtifactAck, &ack).await
    }

    /// Start a job. The execution task owns the runner; the socket loop only
    /// forwards its frames.
    async fn handle_job_request(&mut self, request: JobRequestPayload) -> Result<()> {
        if let Some(active) = &self.active {
            warn!(
                "JobRequest for {} while {} is running; rejecting",
                request.execution_id, active.execution_id
            );
            let update = StatusUpdatePayload {
                session_token: self.session_token.clone(),
                execution_id: request.execution_id,
                status: ExecutionStatus::Failed,
                exit_code: None,
                message: Some("worker already busy".to_string()),
                produced_artifacts: vec![],
                metrics: HashMap::new(),
            };
            return self.send_json(OpCode::StatusUpdate, &update).await;
        }

        for artifact in &request.required_artifacts {
            if !self.cache.contains(&artifact.id) {
                let update = StatusUpdatePayload {
                    session_token: self.session_token.clone(),
                    execution_id: request.execution_id.clone(),
                    status: ExecutionStatus::Failed,
                    exit_code: None,
                    message: Some(format!(
                        "required artifact '{}' not in local cache",
                        artifact.name
                    )),
                    produced_artifacts: vec![],
                    metrics: HashMap::new(),
                };
                return self.send_json(OpCode::StatusUpdate, &update).await;
            }
        }

        info!(
            "JobRequest {} ('{}')",
            request.execution_id, request.job_name
        );
        let cancel = CancellationToken::new();
        self.active = Some(ActiveJob {
            execution_id: request.execution_id.clone(),
            cancel: cancel.clone(),
        });

        let job_tx = self.job_tx.clone();
        let session_token = self.session_token.clone();
        tokio::spawn(run_job(request, cancel, session_token, job_tx));
        Ok(())
    }

    fn handle_cancel(&mut self, cancel: CancelJobPayload) -> Result<()> {
        match &self.active {
            Some(active) if active.execution_id == cancel.execution_id => {
                info!(
                    "Cancelling execution {} ({}, force={})",
                    cancel.execution_id, cancel.reason, cancel.force
                );
                active.cancel.cancel(cancel.reason, cancel.force);
            }
            _ => {
                debug!(
                    "CancelJob for {} which is not running here",
                    cancel.execution_id
                );
            }
        }
        Ok(())
    }
}

/// The execution task: RUNNING update, runner, log forwarding, terminal
/// update, done marker.
async fn run_job(
    request: JobRequestPayload,
    cancel: CancellationToken,
    session_token: SessionToken,
    job_tx: mpsc::Sender<FromJob>,
) {
    let execution_id = request.execution_id.clone();

    let running = StatusUpdatePayload {
        session_token: session_token.clone(),
        execution_id: execution_id.clone(),
        status: ExecutionStatus::Running,
        exit_code: None,
        message: None,
        produced_artifacts: vec![],
        metrics: HashMap::new(),
    };
    if send_from_job(&job_tx, OpCode::StatusUpdate, &running).await.is_err() {
        return;
    }

    let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
    let log_forwarder = {
        let job_tx = job_tx.clone();
        let session_token = session_token.clone();
        let execution_id = execution_id.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                let chunk = LogChunkPayload {
                    session_token: session_token.clone(),
                    execution_id: execution_id.clone(),
                    stream: line.stream,
                    at: WireTimestamp::now(),
                    line: line.line,
                };
                if send_from_job(&job_tx, OpCode::LogChunk, &chunk).await.is_err() {
                    return;
                }
            }
        })
    };

    let started = std::time::Instant::now();
    let outcome = runner::run_content(
        &request.content,
        &request.env,
        &request.parameters,
        &cancel,
        line_tx,
    )
    .await;
    log_forwarder.await.ok();

    let mut metrics = HashMap::new();
    metrics.insert(
        "duration_ms".to_string(),
        started.elapsed().as_millis() as i64,
    );

    let update = match outcome {
        Ok(RunOutcome::Exited(0)) => StatusUpdatePayload {
            session_token: session_token.clone(),
            execution_id: execution_id.clone(),
            status: ExecutionStatus::Success,
            exit_code: Some(0),
            message: None,
            produced_artifacts: vec![],
            metrics,
        },
        Ok(RunOutcome::Exited(code)) => StatusUpdatePayload {
            session_token: session_token.clone(),
            execution_id: execution_id.clone(),
            status: ExecutionStatus::Failed,
            exit_code: Some(code),
            message: Some(format!("exited with code {code}")),
            produced_artifacts: vec![],
            metrics,
        },
        Ok(RunOutcome::Cancelled) => StatusUpdatePayload {
            session_token: session_token.clone(),
            execution_id: execution_id.clone(),
            status: ExecutionStatus::Cancelled,
            exit_code: None,
            message: Some(
                cancel
                    .request()
                    .map(|r| r.reason)
                    .unwrap_or_else(|| "cancelled".to_string()),
            ),
            produced_artifacts: vec![],
            metrics,
        },
        Err(err) => StatusUpdatePayload {
            session_token: session_token.clone(),
            execution_id: execution_id.clone(),
            status: ExecutionStatus::Failed,
            exit_code: None,
            message: Some(err.to_string()),
            produced_artifacts: vec![],
            metrics,
        },
    };
    let _ = send_from_job(&job_tx, OpCode::StatusUpdate, &update).await;
    let _ = job_tx.send(FromJob::Done(execution_id)).await;
}

async fn send_from_job<T: serde::Serialize>(
    job_tx: &mpsc::Sender<FromJob>,
    opcode: OpCode,
    payload: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(payload)?;
    job_tx
        .send(FromJob::Frame { opcode, payload })
        .await
        .map_err(|_| anyhow::anyhow!("socket loop gone"))
}

/// Send a frame as multipart [header, payload].
async fn send_frame(socket: &mut DealerSocket, frame: Frame) -> Result<()> {
    let (header, payload) = frame.pack()?;
    let mut message = ZmqMessage::from(header);
    message.push_back(payload.into());
    socket.send(message).await?;
    Ok(())
}

async fn recv_frame(socket: &mut DealerSocket) -> Result<Frame> {
    let message = socket.recv().await?;
    unpack_message(message)
}

fn unpack_message(message: ZmqMessage) -> Result<Frame> {
    let frames: Vec<Vec<u8>> = message.into_vec().into_iter().map(|b| b.to_vec()).collect();
    if frames.len() < 2 {
        bail!("Expected 2 frames [header, payload], got {}", frames.len());
    }
    Ok(Frame::unpack(&frames)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config() {
        let config = WorkerConfig {
            orchestrator_addr: "tcp://localhost:7465".to_string(),
            worker_id: WorkerId::new(),
            name: "test-worker".to_string(),
            pool_id: PoolId::new(),
            capabilities: HashMap::new(),
            resources: ResourceSpec::new(4000, 8192, 0),
            cache_dir: PathBuf::from("/tmp/hodei-cache"),
        };
        assert_eq!(config.orchestrator_addr, "tcp://localhost:7465");
        assert_eq!(config.name, "test-worker");
    }
}
