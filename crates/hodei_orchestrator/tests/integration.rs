//! End-to-end control-plane tests.
//!
//! A test harness registers simulated workers straight against the transport
//! (no sockets) and drives the protocol by hand: the scheduler loop runs for
//! real, the workers are scripted.

use hodei_ids::{ExecutionId, PoolId, SessionToken, WorkerId};
use hodei_orchestrator::models::{JobDefinition, Pool};
use hodei_orchestrator::transport::Outgoing;
use hodei_orchestrator::{run_liveness_sweep, Orchestrator, OrchestratorConfig};
use hodei_protocol::{
    ArtifactAckPayload, ArtifactChunk, CacheEntry, CacheQueryPayload, CacheResponsePayload,
    CancelJobPayload, ExecutionStatus, Frame, HeartbeatPayload, JobContent, JobPriority,
    JobRequestPayload, JobStatus, LogChunkPayload, LogStream, OpCode, PoolKind, QuotaPolicyMode,
    RegisterPayload, ResourceSpec, RetryPolicy, StatusUpdatePayload, WireTimestamp, WorkerStatus,
};
use hodei_state::MemoryRepository;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(dir: &TempDir) -> OrchestratorConfig {
    OrchestratorConfig {
        cache_dir: dir.path().join("cache"),
        heartbeat_interval: Duration::from_millis(100),
        dispatch_timeout: Duration::from_secs(5),
        cancel_grace: Duration::from_secs(5),
        artifact_chunk_bytes: 1024,
        artifact_transfer_timeout: Duration::from_secs(5),
        scheduler_max_sleep: Duration::from_millis(50),
        ..Default::default()
    }
}

struct Harness {
    orch: Orchestrator,
    shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn start() -> Harness {
    start_with(|_| {}).await
}

async fn start_with(tweak: impl FnOnce(&mut OrchestratorConfig)) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let mut config = test_config(&dir);
    tweak(&mut config);

    let repo = Arc::new(MemoryRepository::new());
    let mut orch = Orchestrator::build(config, repo).await.expect("build");
    let scheduler = orch.take_scheduler().expect("scheduler");
    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(scheduler.run(shutdown_rx));

    Harness {
        orch,
        shutdown,
        _dir: dir,
    }
}

async fn make_pool(h: &Harness) -> Pool {
    h.orch
        .facade
        .create_pool("default", PoolKind::Local, 8)
        .await
        .expect("create pool")
}

fn shell_job(name: &str, priority: JobPriority) -> JobDefinition {
    JobDefinition {
        name: name.to_string(),
        namespace: "default".to_string(),
        template_id: None,
        priority,
        content: JobContent::Shell {
            commands: vec!["echo ok".to_string()],
        },
        parameters: HashMap::new(),
        env: HashMap::new(),
        required_artifacts: Vec::new(),
        required_capabilities: HashMap::new(),
        resources: ResourceSpec::new(1000, 512, 0),
        timeout_secs: 3600,
        retry_policy: RetryPolicy::default(),
        created_by: "test".to_string(),
    }
}

/// Scripted worker talking straight to the transport.
struct TestWorker {
    id: WorkerId,
    token: SessionToken,
    rx: mpsc::Receiver<Outgoing>,
}

impl TestWorker {
    async fn join(h: &Harness, pool_id: &PoolId, name: &str) -> Self {
        let id = WorkerId::new();
        // Attach first so the scheduler sees send capacity immediately.
        let rx = h.orch.outbound.attach(&id);
        let reply = h
            .orch
            .transport
            .handle_register(RegisterPayload {
                worker_id: id.clone(),
                name: name.to_string(),
                pool_id: pool_id.clone(),
                capabilities: HashMap::new(),
                resources: ResourceSpec::new(4000, 8192, 0),
            })
            .await;
        assert!(reply.success, "registration failed: {}", reply.message);
        Self {
            id,
            token: reply.session_token.expect("token"),
            rx,
        }
    }

    async fn recv(&mut self) -> Outgoing {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound channel closed")
    }

    /// Next control message, asserting its opcode.
    async fn expect<T: DeserializeOwned>(&mut self, expected: OpCode) -> T {
        match self.recv().await {
            Outgoing::Control { opcode, payload } => {
                assert_eq!(opcode, expected, "unexpected opcode");
                serde_json::from_slice(&payload).expect("decode payload")
            }
            Outgoing::Chunk(chunk) => {
                panic!("expected {expected:?}, got chunk for {}", chunk.artifact_id)
            }
        }
    }

    /// Collect a full chunk stream (through the is_last marker).
    async fn collect_chunks(&mut self) -> Vec<ArtifactChunk> {
        let mut chunks = Vec::new();
        loop {
            match self.recv().await {
                Outgoing::Chunk(chunk) => {
                    let last = chunk.is_last;
                    chunks.push(*chunk);
                    if last {
                        return chunks;
                    }
                }
                Outgoing::Control { opcode, .. } => {
                    panic!("expected chunk, got {opcode:?}")
                }
            }
        }
    }

    async fn send(&self, h: &Harness, opcode: OpCode, payload: &impl serde::Serialize) {
        let frame = Frame::json(opcode, 0, payload).expect("frame");
        h.orch
            .transport
            .handle_frame(&self.id, frame)
            .await
            .expect("handle_frame");
    }

    async fn send_status(
        &self,
        h: &Harness,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        exit_code: Option<i32>,
    ) {
        let payload = StatusUpdatePayload {
            session_token: self.token.clone(),
            execution_id: execution_id.clone(),
            status,
            exit_code,
            message: None,
            produced_artifacts: vec![],
            metrics: HashMap::new(),
        };
        self.send(h, OpCode::StatusUpdate, &payload).await;
    }

    async fn send_log(&self, h: &Harness, execution_id: &ExecutionId, line: &str) {
        let payload = LogChunkPayload {
            session_token: self.token.clone(),
            execution_id: execution_id.clone(),
            stream: LogStream::Stdout,
            at: WireTimestamp::now(),
            line: line.to_string(),
        };
        self.send(h, OpCode::LogChunk, &payload).await;
    }

    async fn send_heartbeat(&self, h: &Harness) {
        let payload = HeartbeatPayload {
            session_token: self.token.clone(),
            status: WorkerStatus::Idle,
            active_executions: vec![],
        };
        self.send(h, OpCode::Heartbeat, &payload).await;
    }

    async fn send_cache_response(
        &self,
        h: &Harness,
        execution_id: &ExecutionId,
        entries: Vec<(String, bool)>,
    ) {
        let payload = CacheResponsePayload {
            session_token: self.token.clone(),
            execution_id: execution_id.clone(),
            entries: entries
                .into_iter()
                .map(|(artifact_id, cached)| CacheEntry {
                    artifact_id,
                    cached,
                })
                .collect(),
        };
        self.send(h, OpCode::CacheResponse, &payload).await;
    }

    async fn send_ack(
        &self,
        h: &Harness,
        execution_id: &ExecutionId,
        artifact_id: &str,
        success: bool,
        cache_hit: bool,
    ) {
        let payload = ArtifactAckPayload {
            session_token: self.token.clone(),
            execution_id: execution_id.clone(),
            artifact_id: artifact_id.to_string(),
            success,
            cache_hit,
            message: (!success).then(|| "hash mismatch".to_string()),
        };
        self.send(h, OpCode::ArtifactAck, &payload).await;
    }
}

/// Poll until `f` yields Some, or fail after the shared timeout.
async fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(value) = f() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time")
}

// ============================================================================
// Scenarios
// ============================================================================

/// S1: submit -> dispatch -> RUNNING -> SUCCESS; worker ends idle, logs kept.
#[tokio::test(flavor = "multi_thread")]
async fn test_simple_success() {
    let h = start().await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    let job = h
        .orch
        .facade
        .submit_job(shell_job("hello", JobPriority::Normal))
        .await
        .unwrap();

    let request: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    assert_eq!(request.job_id, job.id);
    assert_eq!(request.job_name, "hello");

    worker
        .send_status(&h, &request.execution_id, ExecutionStatus::Running, None)
        .await;
    assert_eq!(
        h.orch.facade.get_job(&job.id).unwrap().status,
        JobStatus::Running
    );

    worker.send_log(&h, &request.execution_id, "ok").await;
    worker
        .send_status(&h, &request.execution_id, ExecutionStatus::Success, Some(0))
        .await;

    let final_job = wait_for(|| {
        let job = h.orch.facade.get_job(&job.id).unwrap();
        job.status.is_terminal().then_some(job)
    })
    .await;
    assert_eq!(final_job.status, JobStatus::Completed);

    let execution = h.orch.facade.get_execution(&request.execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.exit_code, Some(0));

    let session = h.orch.registry.get(&worker.id).unwrap();
    assert_eq!(session.status, WorkerStatus::Idle);
    assert!(session.current_execution.is_none());

    let (logs, _rx) = h
        .orch
        .facade
        .subscribe_logs(&request.execution_id, None)
        .unwrap();
    assert!(logs.iter().any(|l| l.line == "ok"));

    // Pool capacity fully released.
    let pool = h.orch.facade.get_pool(&pool.id).unwrap();
    assert_eq!(pool.capacity.used, ResourceSpec::ZERO);
}

/// S2: worker dies mid-run; the job retries on a new worker and completes
/// with a fresh execution id (at-most-once dispatch across retries).
#[tokio::test(flavor = "multi_thread")]
async fn test_worker_crash_retries_on_new_worker() {
    let h = start().await;
    let pool = make_pool(&h).await;

    // Liveness sweep runs for real in this test.
    let (sweep_stop, sweep_rx) = watch::channel(false);
    tokio::spawn(run_liveness_sweep(
        h.orch.config.clone(),
        Arc::clone(&h.orch.registry),
        Arc::clone(&h.orch.lifecycle),
        Arc::clone(&h.orch.pools),
        Arc::clone(&h.orch.outbound),
        sweep_rx,
    ));

    let mut w1 = TestWorker::join(&h, &pool.id, "doomed").await;

    let mut definition = shell_job("flaky", JobPriority::Normal);
    definition.retry_policy = RetryPolicy {
        max_retries: 1,
        base_delay_secs: 1,
        multiplier: 2.0,
    };
    let job = h.orch.facade.submit_job(definition).await.unwrap();

    let request: JobRequestPayload = w1.expect(OpCode::JobRequest).await;
    w1.send_status(&h, &request.execution_id, ExecutionStatus::Running, None)
        .await;
    w1.send_heartbeat(&h).await;
    let first_execution = request.execution_id.clone();

    // w1 then goes silent; the sweep declares it lost after 3 missed
    // heartbeats.
    let failed = wait_for(|| {
        let execution = h.orch.facade.get_execution(&first_execution).unwrap();
        execution.status.is_terminal().then_some(execution)
    })
    .await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error_kind.as_deref(), Some("WorkerDisconnected"));

    // Job is queued again behind its 1 s backoff.
    let requeued = h.orch.facade.get_job(&job.id).unwrap();
    assert_eq!(requeued.status, JobStatus::Queued);

    // The sweep has done its part; stop it so the scripted second worker
    // does not have to keep heartbeating through the rest of the test.
    let _ = sweep_stop.send(true);

    let mut w2 = TestWorker::join(&h, &pool.id, "healthy").await;
    let retry: JobRequestPayload = w2.expect(OpCode::JobRequest).await;
    assert_eq!(retry.job_id, job.id);
    assert_ne!(retry.execution_id, first_execution);

    w2.send_status(&h, &retry.execution_id, ExecutionStatus::Running, None)
        .await;
    w2.send_status(&h, &retry.execution_id, ExecutionStatus::Success, Some(0))
        .await;

    let final_job = wait_for(|| {
        let job = h.orch.facade.get_job(&job.id).unwrap();
        job.status.is_terminal().then_some(job)
    })
    .await;
    assert_eq!(final_job.status, JobStatus::Completed);
    assert_eq!(final_job.attempts, 2);
}

/// S3: cancelling a queued job with no workers creates no execution and
/// touches no worker.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_queued_job() {
    let h = start().await;
    make_pool(&h).await;

    let job = h
        .orch
        .facade
        .submit_job(shell_job("oops", JobPriority::Normal))
        .await
        .unwrap();
    let status = h
        .orch
        .facade
        .cancel_job(&job.id, "oops", false)
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Cancelled);

    assert!(h.orch.facade.list_executions(Some(&job.id)).is_empty());
    // Cancel is idempotent.
    let again = h
        .orch
        .facade
        .cancel_job(&job.id, "again", false)
        .await
        .unwrap();
    assert_eq!(again, JobStatus::Cancelled);
}

/// S4: ENFORCE quota with maxConcurrentJobs=1 keeps the second job queued
/// until the first completes, even with idle workers to spare.
#[tokio::test(flavor = "multi_thread")]
async fn test_quota_holds_second_job() {
    let h = start().await;
    let pool = make_pool(&h).await;
    h.orch
        .facade
        .set_quota(
            "default",
            QuotaPolicyMode::Enforce,
            hodei_orchestrator::models::QuotaLimits {
                max_concurrent_jobs: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut w1 = TestWorker::join(&h, &pool.id, "w1").await;
    let _w2 = TestWorker::join(&h, &pool.id, "w2").await;

    let j1 = h
        .orch
        .facade
        .submit_job(shell_job("first", JobPriority::Normal))
        .await
        .unwrap();
    let j2 = h
        .orch
        .facade
        .submit_job(shell_job("second", JobPriority::Normal))
        .await
        .unwrap();

    let request: JobRequestPayload = w1.expect(OpCode::JobRequest).await;
    assert_eq!(request.job_id, j1.id);
    w1.send_status(&h, &request.execution_id, ExecutionStatus::Running, None)
        .await;

    // J2 must stay queued while J1 holds the quota.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        h.orch.facade.get_job(&j2.id).unwrap().status,
        JobStatus::Queued
    );

    w1.send_status(&h, &request.execution_id, ExecutionStatus::Success, Some(0))
        .await;

    // J1's completion releases the quota; J2 dispatches (either worker).
    wait_for(|| {
        let status = h.orch.facade.get_job(&j2.id).unwrap().status;
        matches!(status, JobStatus::Pending | JobStatus::Running).then_some(())
    })
    .await;
}

/// S5: only the artifacts missing from the worker cache are streamed, and
/// every artifact gets exactly one ack.
#[tokio::test(flavor = "multi_thread")]
async fn test_artifact_dedup_streams_only_misses() {
    let h = start().await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    let a = h.orch.facade.put_artifact(b"artifact-a").unwrap();
    let b = h.orch.facade.put_artifact(b"artifact-b").unwrap();
    let c_bytes = vec![7u8; 4096];
    let c = h.orch.facade.put_artifact(&c_bytes).unwrap();

    let mut definition = shell_job("needs-artifacts", JobPriority::Normal);
    definition.required_artifacts = vec![
        hodei_protocol::ArtifactRef {
            id: a.clone(),
            name: "a".to_string(),
            size: 10,
        },
        hodei_protocol::ArtifactRef {
            id: b.clone(),
            name: "b".to_string(),
            size: 10,
        },
        hodei_protocol::ArtifactRef {
            id: c.clone(),
            name: "c".to_string(),
            size: c_bytes.len() as u64,
        },
    ];
    let job = h.orch.facade.submit_job(definition).await.unwrap();

    let query: CacheQueryPayload = worker.expect(OpCode::CacheQuery).await;
    assert_eq!(query.artifact_ids.len(), 3);
    let execution_id = query.execution_id.clone();

    // A and B are cached; one eager ack each.
    worker
        .send_cache_response(
            &h,
            &execution_id,
            vec![(a.clone(), true), (b.clone(), true), (c.clone(), false)],
        )
        .await;
    worker.send_ack(&h, &execution_id, &a, true, true).await;
    worker.send_ack(&h, &execution_id, &b, true, true).await;

    // Only C's chunks arrive.
    let chunks = worker.collect_chunks().await;
    assert!(chunks.iter().all(|chunk| chunk.artifact_id == c));
    assert_eq!(chunks[0].seq, 0);
    let (assembled_id, assembled) =
        hodei_cache::assemble_from_chunks(chunks).expect("assemble");
    assert_eq!(assembled_id, c);
    assert_eq!(assembled, c_bytes);
    worker.send_ack(&h, &execution_id, &c, true, false).await;

    let request: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    assert_eq!(request.job_id, job.id);
    assert_eq!(request.execution_id, execution_id);
}

/// S6: three rejected transfers fail the execution with CorruptArtifact.
#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_artifact_fails_after_three_attempts() {
    let h = start().await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    let x = h.orch.facade.put_artifact(b"artifact-x").unwrap();
    let mut definition = shell_job("corrupt", JobPriority::Normal);
    definition.required_artifacts = vec![hodei_protocol::ArtifactRef {
        id: x.clone(),
        name: "x".to_string(),
        size: 10,
    }];
    let job = h.orch.facade.submit_job(definition).await.unwrap();

    let query: CacheQueryPayload = worker.expect(OpCode::CacheQuery).await;
    let execution_id = query.execution_id.clone();
    worker
        .send_cache_response(&h, &execution_id, vec![(x.clone(), false)])
        .await;

    // Reject the transfer three times, as a worker whose reassembly keeps
    // failing the hash check would.
    for _ in 0..3 {
        let chunks = worker.collect_chunks().await;
        assert!(chunks.iter().all(|chunk| chunk.artifact_id == x));
        worker.send_ack(&h, &execution_id, &x, false, false).await;
    }

    let execution = wait_for(|| {
        let execution = h.orch.facade.get_execution(&execution_id).unwrap();
        execution.status.is_terminal().then_some(execution)
    })
    .await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind.as_deref(), Some("CorruptArtifact"));

    let final_job = wait_for(|| {
        let job = h.orch.facade.get_job(&job.id).unwrap();
        job.status.is_terminal().then_some(job)
    })
    .await;
    assert_eq!(final_job.status, JobStatus::Failed);
}

// ============================================================================
// Properties
// ============================================================================

/// Property 1: higher priority dispatches first when both fit.
#[tokio::test(flavor = "multi_thread")]
async fn test_priority_dispatch_order() {
    let h = start().await;
    let pool = make_pool(&h).await;

    let low = h
        .orch
        .facade
        .submit_job(shell_job("low", JobPriority::Low))
        .await
        .unwrap();
    let critical = h
        .orch
        .facade
        .submit_job(shell_job("critical", JobPriority::Critical))
        .await
        .unwrap();

    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    let first: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    assert_eq!(first.job_id, critical.id);
    worker
        .send_status(&h, &first.execution_id, ExecutionStatus::Running, None)
        .await;
    worker
        .send_status(&h, &first.execution_id, ExecutionStatus::Success, Some(0))
        .await;

    let second: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    assert_eq!(second.job_id, low.id);
}

/// Property 6/part: a worker that never confirms RUNNING trips the dispatch
/// window and the job fails once retries are exhausted.
#[tokio::test(flavor = "multi_thread")]
async fn test_dispatch_timeout_fails_execution() {
    let h = start_with(|config| {
        config.dispatch_timeout = Duration::from_millis(200);
    })
    .await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "mute").await;

    let job = h
        .orch
        .facade
        .submit_job(shell_job("stuck", JobPriority::Normal))
        .await
        .unwrap();
    let request: JobRequestPayload = worker.expect(OpCode::JobRequest).await;

    // Worker stays mute; the window closes on its own.
    let execution = wait_for(|| {
        let execution = h.orch.facade.get_execution(&request.execution_id).unwrap();
        execution.status.is_terminal().then_some(execution)
    })
    .await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind.as_deref(), Some("DispatchTimeout"));

    let final_job = wait_for(|| {
        let job = h.orch.facade.get_job(&job.id).unwrap();
        job.status.is_terminal().then_some(job)
    })
    .await;
    assert_eq!(final_job.status, JobStatus::Failed);
}

/// Property 7: cancelling a running job reaches the worker; repeated cancels
/// converge on the same final state.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_running_job_propagates_and_is_idempotent() {
    let h = start().await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    let job = h
        .orch
        .facade
        .submit_job(shell_job("long", JobPriority::Normal))
        .await
        .unwrap();
    let request: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    worker
        .send_status(&h, &request.execution_id, ExecutionStatus::Running, None)
        .await;

    h.orch
        .facade
        .cancel_job(&job.id, "operator says no", false)
        .await
        .unwrap();

    let cancel: CancelJobPayload = worker.expect(OpCode::CancelJob).await;
    assert_eq!(cancel.execution_id, request.execution_id);
    assert!(!cancel.force);

    worker
        .send_status(&h, &request.execution_id, ExecutionStatus::Cancelled, None)
        .await;

    let final_job = wait_for(|| {
        let job = h.orch.facade.get_job(&job.id).unwrap();
        job.status.is_terminal().then_some(job)
    })
    .await;
    assert_eq!(final_job.status, JobStatus::Cancelled);

    // N further cancels change nothing.
    for _ in 0..3 {
        let status = h
            .orch
            .facade
            .cancel_job(&job.id, "again", false)
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Cancelled);
    }
    let execution = h.orch.facade.get_execution(&request.execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
}

/// Property 8: two subscribers replaying an execution's events observe the
/// same sequence.
#[tokio::test(flavor = "multi_thread")]
async fn test_event_replay_is_deterministic() {
    let h = start().await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    let job = h
        .orch
        .facade
        .submit_job(shell_job("events", JobPriority::Normal))
        .await
        .unwrap();
    let request: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    worker
        .send_status(&h, &request.execution_id, ExecutionStatus::Running, None)
        .await;
    worker
        .send_status(&h, &request.execution_id, ExecutionStatus::Success, Some(0))
        .await;
    wait_for(|| {
        h.orch
            .facade
            .get_job(&job.id)
            .unwrap()
            .status
            .is_terminal()
            .then_some(())
    })
    .await;

    let first = h.orch.facade.replay_events(&request.execution_id).unwrap();
    let second = h.orch.facade.replay_events(&request.execution_id).unwrap();

    assert!(!first.is_empty());
    let kinds: Vec<_> = first.iter().map(|e| e.kind).collect();
    let kinds_again: Vec<_> = second.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, kinds_again);
    let ids: Vec<_> = first.iter().map(|e| e.id.clone()).collect();
    let ids_again: Vec<_> = second.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, ids_again);
}

/// Draining a pool stops new dispatches; resuming restores them.
#[tokio::test(flavor = "multi_thread")]
async fn test_drain_blocks_dispatch_until_resume() {
    let h = start().await;
    let pool = make_pool(&h).await;
    let mut worker = TestWorker::join(&h, &pool.id, "w1").await;

    h.orch
        .facade
        .drain_pool(&pool.id, Duration::from_secs(60), false)
        .await
        .unwrap();

    let job = h
        .orch
        .facade
        .submit_job(shell_job("waits", JobPriority::Normal))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        h.orch.facade.get_job(&job.id).unwrap().status,
        JobStatus::Queued
    );

    h.orch.facade.resume_pool(&pool.id).await.unwrap();
    let request: JobRequestPayload = worker.expect(OpCode::JobRequest).await;
    assert_eq!(request.job_id, job.id);
}
