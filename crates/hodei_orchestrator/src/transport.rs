//! Worker transport: the orchestrator half of the bidirectional channel.
//!
//! One bounded outbound queue per worker (backpressure), a single inbound
//! dispatcher (FIFO per connection), and the per-execution dispatch driver
//! that ships artifacts, sends the job request, and arms the dispatch-window
//! watchdog. The ZMQ ROUTER adapter at the bottom is the only piece that
//! touches sockets; everything above it is exercised directly by tests
//! through in-memory channels.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::lifecycle::ExecutionLifecycle;
use crate::metrics::METRICS;
use crate::models::{Execution, Job};
use crate::pools::PoolManager;
use crate::registry::WorkerRegistry;
use crate::scheduler::SchedulerWake;
use hodei_cache::{ArtifactStore, ChunkStream};
use hodei_ids::{ExecutionId, WorkerId};
use hodei_protocol::{
    ArtifactAckPayload, ArtifactChunk, CacheQueryPayload, CacheResponsePayload, Compression,
    Frame, HeartbeatPayload, JobRequestPayload, LogChunkPayload, OpCode, RegisterPayload,
    RegisteredPayload, StatusUpdatePayload,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

// ============================================================================
// Outbound: per-worker bounded send queues
// ============================================================================

/// A message queued for one worker. Frames (with their sequence numbers) are
/// materialized by the single consumer of the queue, so FIFO order and seq
/// order always agree.
#[derive(Debug)]
pub enum Outgoing {
    Control { opcode: OpCode, payload: Vec<u8> },
    Chunk(Box<ArtifactChunk>),
}

impl Outgoing {
    pub fn into_frame(self, seq: u64) -> hodei_protocol::Result<Frame> {
        match self {
            Outgoing::Control { opcode, payload } => Frame::new(opcode, seq, payload),
            Outgoing::Chunk(chunk) => Frame::chunk(seq, &chunk),
        }
    }
}

/// Owner of the per-worker send channels. The channel receiver belongs to the
/// worker's outbound pump (or to a test harness); nothing else reads it.
pub struct Outbound {
    buffer: usize,
    links: Mutex<HashMap<WorkerId, mpsc::Sender<Outgoing>>>,
}

impl Outbound {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Create (or replace) the send queue for a worker, handing back the
    /// receiving end for the pump.
    pub fn attach(&self, worker_id: &WorkerId) -> mpsc::Receiver<Outgoing> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut links = self.links.lock().expect("outbound lock poisoned");
        links.insert(worker_id.clone(), tx);
        rx
    }

    pub fn detach(&self, worker_id: &WorkerId) {
        let mut links = self.links.lock().expect("outbound lock poisoned");
        links.remove(worker_id);
    }

    fn sender(&self, worker_id: &WorkerId) -> Result<mpsc::Sender<Outgoing>> {
        let links = self.links.lock().expect("outbound lock poisoned");
        links
            .get(worker_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::WorkerDisconnected(worker_id.to_string()))
    }

    /// Queue a JSON control message. Blocks when the worker's buffer is full;
    /// that is the backpressure contract.
    pub async fn send_json<T: Serialize>(
        &self,
        worker_id: &WorkerId,
        opcode: OpCode,
        payload: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| OrchestratorError::internal(format!("encode {opcode:?}: {e}")))?;
        self.sender(worker_id)?
            .send(Outgoing::Control {
                opcode,
                payload: bytes,
            })
            .await
            .map_err(|_| OrchestratorError::WorkerDisconnected(worker_id.to_string()))?;
        METRICS.inc(&METRICS.frames_sent);
        Ok(())
    }

    /// Queue one artifact chunk.
    pub async fn send_chunk(&self, worker_id: &WorkerId, chunk: ArtifactChunk) -> Result<()> {
        self.sender(worker_id)?
            .send(Outgoing::Chunk(Box::new(chunk)))
            .await
            .map_err(|_| OrchestratorError::WorkerDisconnected(worker_id.to_string()))?;
        METRICS.inc(&METRICS.frames_sent);
        METRICS.inc(&METRICS.artifact_chunks_sent);
        Ok(())
    }

    /// Whether the worker's queue has room. The scheduler holds off new
    /// dispatches to a worker whose buffer is saturated.
    pub fn has_capacity(&self, worker_id: &WorkerId) -> bool {
        let links = self.links.lock().expect("outbound lock poisoned");
        links
            .get(worker_id)
            .map(|tx| tx.capacity() > 0)
            .unwrap_or(false)
    }

    pub fn is_attached(&self, worker_id: &WorkerId) -> bool {
        let links = self.links.lock().expect("outbound lock poisoned");
        links.contains_key(worker_id)
    }
}

// ============================================================================
// Transport: inbound dispatch + artifact transfer + job dispatch
// ============================================================================

/// In-flight artifact transfer bookkeeping for one execution.
struct TransferHandle {
    cache_resp: Option<oneshot::Sender<CacheResponsePayload>>,
    acks: mpsc::UnboundedSender<ArtifactAckPayload>,
}

pub struct WorkerTransport {
    config: OrchestratorConfig,
    registry: Arc<WorkerRegistry>,
    lifecycle: Arc<ExecutionLifecycle>,
    pools: Arc<PoolManager>,
    cache: Arc<ArtifactStore>,
    outbound: Arc<Outbound>,
    wake: SchedulerWake,
    transfers: Mutex<HashMap<ExecutionId, TransferHandle>>,
}

impl WorkerTransport {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<WorkerRegistry>,
        lifecycle: Arc<ExecutionLifecycle>,
        pools: Arc<PoolManager>,
        cache: Arc<ArtifactStore>,
        outbound: Arc<Outbound>,
        wake: SchedulerWake,
    ) -> Self {
        Self {
            config,
            registry,
            lifecycle,
            pools,
            cache,
            outbound,
            wake,
            transfers: Mutex::new(HashMap::new()),
        }
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    // ------------------------------------------------------------------------
    // Registration handshake
    // ------------------------------------------------------------------------

    /// Full registration flow: pool admission, session mint, orphan cleanup.
    /// A rejection leaves no trace in the registry or the pool.
    pub async fn handle_register(&self, payload: RegisterPayload) -> RegisteredPayload {
        let interval = self.config.heartbeat_interval.as_secs();

        // A re-registration must not double-count the worker's resources.
        if let Some(previous) = self.registry.get(&payload.worker_id) {
            if let Err(err) = self
                .pools
                .detach_worker(&previous.pool_id, &previous.resources)
                .await
            {
                warn!("Failed to detach re-registering worker: {}", err);
            }
        }

        if let Err(err) = self
            .pools
            .attach_worker(&payload.pool_id, &payload.resources)
            .await
        {
            info!(
                "Registration rejected for [{}]: {}",
                payload.name, err
            );
            return RegisteredPayload {
                success: false,
                message: err.to_string(),
                session_token: None,
                heartbeat_interval_secs: interval,
            };
        }

        let (token, orphaned) = self.registry.register(
            payload.worker_id.clone(),
            payload.name,
            payload.pool_id,
            payload.capabilities,
            payload.resources,
        );
        if orphaned.is_some() {
            // The old session was dispatched; its executions cannot finish.
            self.lifecycle
                .handle_worker_lost(&payload.worker_id, "worker re-registered mid-execution")
                .await;
        }

        self.wake.notify();
        RegisteredPayload {
            success: true,
            message: "registered".to_string(),
            session_token: Some(token),
            heartbeat_interval_secs: interval,
        }
    }

    /// Operator-initiated removal (facade `unregister`). The worker gets a
    /// best-effort Shutdown before its channel is torn down.
    pub async fn unregister_worker(&self, worker_id: &WorkerId) -> Result<()> {
        let session = self
            .registry
            .unregister(worker_id)
            .ok_or_else(|| OrchestratorError::not_found("worker", worker_id.to_string()))?;

        let shutdown = hodei_protocol::ShutdownPayload {
            reason: "unregistered by operator".to_string(),
            deadline_secs: self.config.cancel_grace.as_secs(),
        };
        if let Err(err) = self
            .outbound
            .send_json(worker_id, OpCode::Shutdown, &shutdown)
            .await
        {
            debug!("Could not deliver Shutdown to {}: {}", worker_id, err);
        }

        if session.current_execution.is_some() {
            self.lifecycle
                .handle_worker_lost(worker_id, "worker unregistered")
                .await;
        }
        self.pools
            .detach_worker(&session.pool_id, &session.resources)
            .await?;
        self.outbound.detach(worker_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound frames (post-handshake)
    // ------------------------------------------------------------------------

    /// Dispatch one inbound frame. Called in connection order, so per-worker
    /// FIFO holds end to end.
    pub async fn handle_frame(&self, worker_id: &WorkerId, frame: Frame) -> Result<()> {
        METRICS.inc(&METRICS.frames_received);
        match frame.header.opcode {
            OpCode::Heartbeat => {
                let payload: HeartbeatPayload = frame.decode()?;
                match self
                    .registry
                    .heartbeat(worker_id, &payload.session_token, payload.status)
                {
                    Ok(()) => {
                        self.wake.notify();
                        Ok(())
                    }
                    Err(err) => {
                        self.reject_session(worker_id).await;
                        Err(err)
                    }
                }
            }

            OpCode::StatusUpdate => {
                let payload: StatusUpdatePayload = frame.decode()?;
                if let Err(err) = self
                    .registry
                    .validate_token(worker_id, &payload.session_token)
                {
                    self.reject_session(worker_id).await;
                    return Err(err);
                }
                let terminal = payload.status.is_terminal();
                Arc::clone(&self.lifecycle)
                    .handle_status_update(worker_id, payload)
                    .await?;
                if terminal {
                    // A worker slot just opened up.
                    self.wake.notify();
                }
                Ok(())
            }

            OpCode::LogChunk => {
                let payload: LogChunkPayload = frame.decode()?;
                self.registry
                    .validate_token(worker_id, &payload.session_token)?;
                self.lifecycle.append_log(payload);
                Ok(())
            }

            OpCode::ArtifactAck => {
                let payload: ArtifactAckPayload = frame.decode()?;
                self.registry
                    .validate_token(worker_id, &payload.session_token)?;
                self.route_ack(payload);
                Ok(())
            }

            OpCode::CacheResponse => {
                let payload: CacheResponsePayload = frame.decode()?;
                self.registry
                    .validate_token(worker_id, &payload.session_token)?;
                self.route_cache_response(payload);
                Ok(())
            }

            other => {
                METRICS.inc(&METRICS.protocol_errors);
                warn!("Unhandled opcode {:?} from worker {}", other, worker_id);
                Ok(())
            }
        }
    }

    /// An invalid session poisons everything the worker was doing.
    async fn reject_session(&self, worker_id: &WorkerId) {
        self.lifecycle
            .handle_worker_lost(worker_id, "session token invalidated")
            .await;
    }

    fn route_cache_response(&self, payload: CacheResponsePayload) {
        let sender = {
            let mut transfers = self.transfers.lock().expect("transfer lock poisoned");
            transfers
                .get_mut(&payload.execution_id)
                .and_then(|handle| handle.cache_resp.take())
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(payload);
            }
            None => debug!(
                "CacheResponse for execution {} with no transfer in flight",
                payload.execution_id
            ),
        }
    }

    fn route_ack(&self, payload: ArtifactAckPayload) {
        let transfers = self.transfers.lock().expect("transfer lock poisoned");
        match transfers.get(&payload.execution_id) {
            Some(handle) => {
                let _ = handle.acks.send(payload);
            }
            None => debug!(
                "ArtifactAck for execution {} with no transfer in flight",
                payload.execution_id
            ),
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch driver
    // ------------------------------------------------------------------------

    /// Hand a freshly-created execution to its worker: artifact transfer,
    /// then the JobRequest, then the dispatch-window watchdog. Runs as its
    /// own task; failures settle the execution through the lifecycle.
    pub fn begin_dispatch(self: &Arc<Self>, execution: Execution, job: Job) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let execution_id = execution.id.clone();
            if let Err(err) = transport.run_dispatch(&execution, &job).await {
                warn!("Dispatch of execution {} failed: {}", execution_id, err);
                let (kind, message) = (err.kind(), err.to_string());
                if let Err(settle_err) = transport
                    .lifecycle
                    .fail_execution(&execution_id, kind, &message)
                    .await
                {
                    error!(
                        "Failed to settle failed dispatch {}: {}",
                        execution_id, settle_err
                    );
                }
            }
        });
    }

    async fn run_dispatch(self: &Arc<Self>, execution: &Execution, job: &Job) -> Result<()> {
        let started = std::time::Instant::now();

        if !job.definition.required_artifacts.is_empty() {
            self.transfer_artifacts(execution, job).await?;
        }

        let request = JobRequestPayload {
            execution_id: execution.id.clone(),
            job_id: job.id.clone(),
            job_name: job.definition.name.clone(),
            content: job.definition.content.clone(),
            env: job.definition.env.clone(),
            parameters: job.definition.parameters.clone(),
            timeout_secs: job.definition.timeout_secs,
            required_artifacts: job.definition.required_artifacts.clone(),
        };
        self.outbound
            .send_json(&execution.worker_id, OpCode::JobRequest, &request)
            .await?;
        METRICS.inc(&METRICS.jobs_dispatched);
        METRICS.record_dispatch_time(started);
        info!(
            "Dispatched execution {} (job '{}') to {}",
            execution.id, job.definition.name, execution.worker_id
        );

        let lifecycle = Arc::clone(&self.lifecycle);
        let execution_id = execution.id.clone();
        let window = self.config.dispatch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            lifecycle.enforce_dispatch_window(&execution_id).await;
        });
        Ok(())
    }

    /// Ship the job's required artifacts: probe the worker cache, stream the
    /// misses, and collect one ack per artifact. Each artifact gets up to
    /// three transfer attempts before the whole dispatch fails with
    /// `CorruptArtifact`.
    async fn transfer_artifacts(&self, execution: &Execution, job: &Job) -> Result<()> {
        let worker_id = &execution.worker_id;
        let artifact_ids: Vec<String> = job
            .definition
            .required_artifacts
            .iter()
            .map(|a| a.id.clone())
            .collect();

        let (resp_tx, resp_rx) = oneshot::channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        {
            let mut transfers = self.transfers.lock().expect("transfer lock poisoned");
            transfers.insert(
                execution.id.clone(),
                TransferHandle {
                    cache_resp: Some(resp_tx),
                    acks: ack_tx,
                },
            );
        }
        // Whatever happens below, the handle must not outlive the transfer.
        let result = self
            .transfer_artifacts_inner(execution, worker_id, &artifact_ids, resp_rx, &mut ack_rx)
            .await;
        {
            let mut transfers = self.transfers.lock().expect("transfer lock poisoned");
            transfers.remove(&execution.id);
        }
        result
    }

    async fn transfer_artifacts_inner(
        &self,
        execution: &Execution,
        worker_id: &WorkerId,
        artifact_ids: &[String],
        resp_rx: oneshot::Receiver<CacheResponsePayload>,
        ack_rx: &mut mpsc::UnboundedReceiver<ArtifactAckPayload>,
    ) -> Result<()> {
        let query = CacheQueryPayload {
            execution_id: execution.id.clone(),
            artifact_ids: artifact_ids.to_vec(),
        };
        self.outbound
            .send_json(worker_id, OpCode::CacheQuery, &query)
            .await?;

        let deadline = self.config.artifact_transfer_timeout;
        let response = tokio::time::timeout(deadline, resp_rx)
            .await
            .map_err(|_| {
                OrchestratorError::DispatchTimeout(format!(
                    "no CacheResponse from {} within {:?}",
                    worker_id, deadline
                ))
            })?
            .map_err(|_| OrchestratorError::WorkerDisconnected(worker_id.to_string()))?;

        let missing: Vec<String> = response
            .entries
            .iter()
            .filter(|e| !e.cached)
            .map(|e| e.artifact_id.clone())
            .collect();
        debug!(
            "Cache probe for execution {}: {} of {} artifacts missing",
            execution.id,
            missing.len(),
            artifact_ids.len()
        );

        let mut stray_acks: Vec<ArtifactAckPayload> = Vec::new();
        for artifact_id in &missing {
            self.transfer_one(execution, worker_id, artifact_id, ack_rx, &mut stray_acks)
                .await?;
        }
        Ok(())
    }

    async fn transfer_one(
        &self,
        execution: &Execution,
        worker_id: &WorkerId,
        artifact_id: &str,
        ack_rx: &mut mpsc::UnboundedReceiver<ArtifactAckPayload>,
        stray_acks: &mut Vec<ArtifactAckPayload>,
    ) -> Result<()> {
        let bytes = self.cache.get(artifact_id)?.ok_or_else(|| {
            OrchestratorError::not_found("artifact", artifact_id.to_string())
        })?;

        let max_attempts = hodei_protocol::defaults::ARTIFACT_TRANSFER_MAX_ATTEMPTS;
        let mut last_message = String::new();
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                METRICS.inc(&METRICS.artifact_transfer_retries);
                debug!(
                    "Retrying artifact {} for execution {} (attempt {})",
                    &artifact_id[..12],
                    execution.id,
                    attempt
                );
            }

            let stream = ChunkStream::new(
                artifact_id.to_string(),
                bytes.clone(),
                self.config.artifact_chunk_bytes,
                Compression::Gzip,
            );
            for chunk in stream {
                let chunk = chunk?;
                self.outbound.send_chunk(worker_id, chunk).await?;
            }

            let ack = self
                .wait_for_ack(artifact_id, ack_rx, stray_acks)
                .await?;
            if ack.success {
                return Ok(());
            }
            last_message = ack.message.unwrap_or_else(|| "worker rejected artifact".into());
            warn!(
                "Artifact {} rejected by worker (attempt {}): {}",
                &artifact_id[..12],
                attempt,
                last_message
            );
        }

        Err(OrchestratorError::CorruptArtifact {
            artifact_id: artifact_id.to_string(),
            detail: format!("{max_attempts} transfer attempts failed: {last_message}"),
        })
    }

    /// Pull acks until the one for `artifact_id` shows up. Acks for other
    /// artifacts (cache hits reported eagerly) are parked, not dropped.
    async fn wait_for_ack(
        &self,
        artifact_id: &str,
        ack_rx: &mut mpsc::UnboundedReceiver<ArtifactAckPayload>,
        stray_acks: &mut Vec<ArtifactAckPayload>,
    ) -> Result<ArtifactAckPayload> {
        if let Some(pos) = stray_acks.iter().position(|a| a.artifact_id == artifact_id) {
            return Ok(stray_acks.remove(pos));
        }
        let deadline = self.config.artifact_transfer_timeout;
        loop {
            let ack = tokio::time::timeout(deadline, ack_rx.recv())
                .await
                .map_err(|_| {
                    OrchestratorError::DispatchTimeout(format!(
                        "no ArtifactAck for {} within {:?}",
                        &artifact_id[..12],
                        deadline
                    ))
                })?
                .ok_or_else(|| {
                    OrchestratorError::internal("artifact ack channel closed mid-transfer")
                })?;
            if ack.artifact_id == artifact_id {
                return Ok(ack);
            }
            stray_acks.push(ack);
        }
    }
}

// ============================================================================
// ZMQ ROUTER adapter
// ============================================================================

/// Run the worker-facing ROUTER socket. Owns the identity <-> worker map and
/// spawns one outbound pump per registered worker.
pub async fn run_router(
    transport: Arc<WorkerTransport>,
    bind_addr: &str,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

    let mut socket = zeromq::RouterSocket::new();
    socket.bind(bind_addr).await?;
    info!("Worker transport bound to {}", bind_addr);

    // Pumps hand fully-framed messages back for the single socket writer.
    let (writer_tx, mut writer_rx) = mpsc::channel::<(Vec<u8>, Vec<u8>, Vec<u8>)>(64);
    let mut workers_by_identity: HashMap<Vec<u8>, WorkerId> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Worker transport shutting down");
                    return Ok(());
                }
            }

            Some((identity, header, payload)) = writer_rx.recv() => {
                let mut message = ZmqMessage::from(identity);
                message.push_back(header.into());
                message.push_back(payload.into());
                if let Err(err) = socket.send(message).await {
                    warn!("ROUTER send failed: {}", err);
                }
            }

            incoming = socket.recv() => {
                let message = match incoming {
                    Ok(message) => message,
                    Err(err) => {
                        error!("ROUTER recv failed: {}", err);
                        continue;
                    }
                };
                let frames: Vec<Vec<u8>> = message.into_vec().into_iter().map(|b| b.to_vec()).collect();
                if frames.len() < 3 {
                    METRICS.inc(&METRICS.protocol_errors);
                    warn!("Expected 3 frames [identity, header, payload], got {}", frames.len());
                    continue;
                }
                let identity = frames[0].clone();
                let frame = match Frame::unpack(&frames[1..]) {
                    Ok(frame) => frame,
                    Err(err) => {
                        METRICS.inc(&METRICS.protocol_errors);
                        if err.is_frame_fault() {
                            // The peer cannot even frame bytes correctly;
                            // worth a louder note than a bad payload.
                            warn!("Unframeable message from peer: {}", err);
                        } else {
                            warn!("Dropping malformed frame: {}", err);
                        }
                        continue;
                    }
                };

                if frame.header.opcode == OpCode::Register {
                    let payload: RegisterPayload = match frame.decode() {
                        Ok(payload) => payload,
                        Err(err) => {
                            METRICS.inc(&METRICS.protocol_errors);
                            warn!("Dropping malformed Register: {}", err);
                            continue;
                        }
                    };
                    let worker_id = payload.worker_id.clone();
                    let reply = transport.handle_register(payload).await;

                    if reply.success {
                        workers_by_identity.insert(identity.clone(), worker_id.clone());
                        let rx = transport.outbound().attach(&worker_id);
                        tokio::spawn(run_outbound_pump(
                            identity.clone(),
                            rx,
                            writer_tx.clone(),
                        ));
                    }

                    match Frame::json(OpCode::Registered, 0, &reply) {
                        Ok(frame) => {
                            if let Ok((header, body)) = frame.pack() {
                                // try_send: awaiting here while the writer
                                // queue is full would wedge the loop that
                                // drains it. A dropped reply costs the worker
                                // one handshake timeout.
                                if writer_tx.try_send((identity, header, body)).is_err() {
                                    warn!("Writer queue full, dropping Registered reply");
                                }
                            }
                        }
                        Err(err) => error!("Failed to encode Registered reply: {}", err),
                    }
                    continue;
                }

                let Some(worker_id) = workers_by_identity.get(&identity).cloned() else {
                    METRICS.inc(&METRICS.protocol_errors);
                    debug!("Frame from unregistered identity, dropping");
                    continue;
                };
                if let Err(err) = transport.handle_frame(&worker_id, frame).await {
                    warn!("Error handling frame from {}: {}", worker_id, err);
                }
            }
        }
    }
}

/// Drain one worker's outbound queue onto the shared socket writer, stamping
/// frame sequence numbers in queue order.
async fn run_outbound_pump(
    identity: Vec<u8>,
    mut rx: mpsc::Receiver<Outgoing>,
    writer_tx: mpsc::Sender<(Vec<u8>, Vec<u8>, Vec<u8>)>,
) {
    let mut seq: u64 = 0;
    while let Some(outgoing) = rx.recv().await {
        let frame = match outgoing.into_frame(seq) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Failed to frame outbound message: {}", err);
                continue;
            }
        };
        seq += 1;
        let (header, payload) = match frame.pack() {
            Ok(parts) => parts,
            Err(err) => {
                error!("Failed to pack outbound frame: {}", err);
                continue;
            }
        };
        if writer_tx.send((identity.clone(), header, payload)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_attach_send_receive() {
        let outbound = Outbound::new(4);
        let worker_id = WorkerId::new();
        let mut rx = outbound.attach(&worker_id);

        outbound
            .send_json(&worker_id, OpCode::Shutdown, &hodei_protocol::ShutdownPayload {
                reason: "test".to_string(),
                deadline_secs: 5,
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Outgoing::Control { opcode, .. } => assert_eq!(opcode, OpCode::Shutdown),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outbound_unattached_worker_errors() {
        let outbound = Outbound::new(4);
        let err = outbound
            .send_json(&WorkerId::new(), OpCode::CancelJob, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WorkerDisconnected");
    }

    #[tokio::test]
    async fn test_outbound_capacity_reporting() {
        let outbound = Outbound::new(1);
        let worker_id = WorkerId::new();
        let _rx = outbound.attach(&worker_id);

        assert!(outbound.has_capacity(&worker_id));
        outbound
            .send_json(&worker_id, OpCode::Shutdown, &serde_json::json!({"reason": "x", "deadline_secs": 1}))
            .await
            .unwrap();
        assert!(!outbound.has_capacity(&worker_id));
    }

    #[test]
    fn test_outgoing_frame_seq_stamping() {
        let outgoing = Outgoing::Control {
            opcode: OpCode::CacheQuery,
            payload: b"{}".to_vec(),
        };
        let frame = outgoing.into_frame(41).unwrap();
        assert_eq!(frame.header.seq, 41);
        assert_eq!(frame.header.opcode, OpCode::CacheQuery);
    }
}
