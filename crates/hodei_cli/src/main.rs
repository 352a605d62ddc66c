//! Hodei command-line client.
//!
//! Talks to the orchestrator's control API. The endpoint comes from the
//! active context in `~/.hodei/config` unless `--url` overrides it.

mod context;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use hodei_ids::{ExecutionId, JobId, PoolId, WorkerId};
use hodei_orchestrator::control::{ControlRequest, ControlResponse};
use hodei_orchestrator::ControlClient;
use hodei_protocol::{JobContent, JobPriority, JobStatus, PoolKind, QuotaPolicyMode};
use std::collections::HashMap;

#[derive(Parser, Debug)]
#[command(name = "hodei", about = "Hodei Pipelines CLI", version)]
struct Args {
    /// Control endpoint override (otherwise the active context's url)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage CLI contexts (~/.hodei/config)
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Submit a job
    Submit {
        /// Job name
        #[arg(long)]
        name: String,
        /// Shell command to run (repeatable, runs in order)
        #[arg(long = "command", required = true)]
        commands: Vec<String>,
        #[arg(long, default_value = "NORMAL")]
        priority: JobPriority,
        #[arg(long, default_value = "default")]
        namespace: String,
        /// Retry attempts after failure
        #[arg(long, default_value_t = 0)]
        max_retries: u32,
    },

    /// List jobs
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one job and its executions
    Job { job_id: JobId },

    /// Cancel a job
    Cancel {
        job_id: JobId,
        #[arg(long)]
        reason: Option<String>,
        /// Do not wait for worker confirmation
        #[arg(long)]
        force: bool,
    },

    /// Retry a terminal job as a new submission
    Retry { job_id: JobId },

    /// Show an execution's logs
    Logs { execution_id: ExecutionId },

    /// Show an execution's events
    Events { execution_id: ExecutionId },

    /// List registered workers
    Workers,

    /// Drop a worker's registration
    UnregisterWorker { worker_id: WorkerId },

    /// Manage pools
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },

    /// List pools
    Pools,

    /// Manage quotas
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },

    /// List quotas
    Quotas,

    /// Queue statistics
    Stats,

    /// Prometheus metrics dump
    Metrics,
}

#[derive(Subcommand, Debug)]
enum ContextAction {
    /// List contexts
    List,
    /// Switch the active context
    Use { name: String },
    /// Create or update a context
    Set {
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete a context
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum PoolAction {
    Create {
        name: String,
        #[arg(long, default_value = "local")]
        kind: PoolKind,
        #[arg(long, default_value_t = 8)]
        slots: u32,
    },
    Drain {
        pool_id: PoolId,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
        #[arg(long)]
        force: bool,
    },
    Resume { pool_id: PoolId },
    Maintenance {
        pool_id: PoolId,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        allow_new_jobs: bool,
    },
    Delete { pool_id: PoolId },
}

#[derive(Subcommand, Debug)]
enum QuotaAction {
    Set {
        namespace: String,
        #[arg(long, default_value = "ENFORCE")]
        mode: String,
        #[arg(long, default_value_t = 0)]
        max_concurrent_jobs: u32,
        #[arg(long, default_value_t = 0)]
        max_cpu_millis: u64,
        #[arg(long, default_value_t = 0)]
        max_memory_mb: u64,
        #[arg(long, default_value_t = 0)]
        max_jobs_per_hour: u32,
        #[arg(long, default_value_t = 0)]
        max_jobs_per_day: u32,
    },
    Delete { namespace: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Context subcommands are local file operations; no endpoint needed.
    if let Command::Context { action } = &args.command {
        return handle_context(action);
    }

    let url = match &args.url {
        Some(url) => url.clone(),
        None => context::load()?.current()?.url,
    };
    let client = ControlClient::connect(&url).await?;
    run_command(&client, args.command).await
}

fn handle_context(action: &ContextAction) -> Result<()> {
    match action {
        ContextAction::List => {
            let file = context::load()?;
            let mut table = new_table(vec!["", "NAME", "URL", "USER"]);
            for (name, entry) in &file.contexts {
                let marker = if file.current_context.as_deref() == Some(name) {
                    "*"
                } else {
                    ""
                };
                table.add_row(vec![
                    marker,
                    name.as_str(),
                    entry.url.as_str(),
                    entry.user.as_deref().unwrap_or("-"),
                ]);
            }
            println!("{table}");
        }
        ContextAction::Use { name } => {
            let mut file = context::load()?;
            if !file.contexts.contains_key(name) {
                bail!("context '{}' does not exist", name);
            }
            file.current_context = Some(name.clone());
            context::save(&file)?;
            println!("Switched to context '{name}'");
        }
        ContextAction::Set {
            name,
            url,
            user,
            token,
        } => {
            let mut file = context::load()?;
            file.contexts.insert(
                name.clone(),
                context::ContextEntry {
                    url: url.clone(),
                    user: user.clone(),
                    token: token.clone(),
                },
            );
            if file.current_context.is_none() {
                file.current_context = Some(name.clone());
            }
            context::save(&file)?;
            println!("Context '{name}' saved");
        }
        ContextAction::Delete { name } => {
            let mut file = context::load()?;
            if file.contexts.remove(name).is_none() {
                bail!("context '{}' does not exist", name);
            }
            if file.current_context.as_deref() == Some(name) {
                file.current_context = None;
            }
            context::save(&file)?;
            println!("Context '{name}' deleted");
        }
    }
    Ok(())
}

async fn run_command(client: &ControlClient, command: Command) -> Result<()> {
    match command {
        Command::Context { .. } => unreachable!("handled before connecting"),

        Command::Submit {
            name,
            commands,
            priority,
            namespace,
            max_retries,
        } => {
            let definition = hodei_orchestrator::models::JobDefinition {
                name,
                namespace,
                template_id: None,
                priority,
                content: JobContent::Shell { commands },
                parameters: HashMap::new(),
                env: HashMap::new(),
                required_artifacts: vec![],
                required_capabilities: HashMap::new(),
                resources: Default::default(),
                timeout_secs: hodei_protocol::defaults::DEFAULT_JOB_TIMEOUT_SECS,
                retry_policy: hodei_protocol::RetryPolicy {
                    max_retries,
                    ..Default::default()
                },
                created_by: whoami(),
            };
            match client.request(&ControlRequest::SubmitJob { definition }).await? {
                ControlResponse::Job(job) => {
                    println!("Submitted job {} ({})", job.id, job.definition.name)
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Jobs { status, limit } => {
            match client
                .request(&ControlRequest::ListJobs {
                    status,
                    limit: Some(limit),
                    offset: None,
                })
                .await?
            {
                ControlResponse::Jobs(jobs) => {
                    let mut table =
                        new_table(vec!["ID", "NAME", "STATUS", "PRIORITY", "ATTEMPTS", "CREATED"]);
                    for job in jobs {
                        table.add_row(vec![
                            job.id.to_string(),
                            job.definition.name.clone(),
                            job.status.to_string(),
                            job.definition.priority.to_string(),
                            job.attempts.to_string(),
                            job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        ]);
                    }
                    println!("{table}");
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Job { job_id } => {
            let job = match client
                .request(&ControlRequest::GetJob {
                    job_id: job_id.clone(),
                })
                .await?
            {
                ControlResponse::Job(job) => job,
                other => bail!("unexpected response: {other:?}"),
            };
            println!("Job {}", job.id);
            println!("  Name:      {}", job.definition.name);
            println!("  Namespace: {}", job.definition.namespace);
            println!("  Status:    {}", job.status);
            println!("  Priority:  {}", job.definition.priority);
            println!("  Attempts:  {}", job.attempts);
            if let Some(error) = &job.last_error {
                println!("  Last error: {error}");
            }

            if let ControlResponse::Executions(executions) = client
                .request(&ControlRequest::ListExecutions {
                    job_id: Some(job_id),
                })
                .await?
            {
                let mut table = new_table(vec!["EXECUTION", "ATTEMPT", "STATUS", "WORKER", "EXIT"]);
                for execution in executions {
                    table.add_row(vec![
                        execution.id.to_string(),
                        execution.attempt.to_string(),
                        execution.status.to_string(),
                        execution.worker_id.to_string(),
                        execution
                            .exit_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ]);
                }
                println!("{table}");
            }
        }

        Command::Cancel {
            job_id,
            reason,
            force,
        } => {
            match client
                .request(&ControlRequest::CancelJob {
                    job_id,
                    reason,
                    force,
                })
                .await?
            {
                ControlResponse::JobCancelled { status } => println!("Job is now {status}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Retry { job_id } => {
            match client.request(&ControlRequest::RetryJob { job_id }).await? {
                ControlResponse::Job(job) => println!("Retried as job {}", job.id),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Logs { execution_id } => {
            match client
                .request(&ControlRequest::GetExecutionLogs { execution_id })
                .await?
            {
                ControlResponse::Logs(logs) => {
                    for entry in logs {
                        println!(
                            "{} [{}] {}",
                            entry.at.format("%H:%M:%S%.3f"),
                            entry.stream.as_str(),
                            entry.line
                        );
                    }
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Events { execution_id } => {
            match client
                .request(&ControlRequest::GetExecutionEvents { execution_id })
                .await?
            {
                ControlResponse::Events(events) => {
                    for event in events {
                        println!(
                            "{} {}",
                            event.at.format("%Y-%m-%d %H:%M:%S%.3f"),
                            event.kind
                        );
                    }
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Workers => {
            match client.request(&ControlRequest::ListWorkers).await? {
                ControlResponse::Workers(workers) => {
                    let mut table =
                        new_table(vec!["ID", "NAME", "POOL", "STATUS", "EXECUTION", "HEARTBEAT"]);
                    for worker in workers {
                        table.add_row(vec![
                            worker.worker_id.to_string(),
                            worker.name.clone(),
                            worker.pool_id.to_string(),
                            worker.status.to_string(),
                            worker
                                .current_execution
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                            format!("{}s ago", worker.last_heartbeat_secs_ago),
                        ]);
                    }
                    println!("{table}");
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::UnregisterWorker { worker_id } => {
            match client
                .request(&ControlRequest::UnregisterWorker { worker_id })
                .await?
            {
                ControlResponse::Ok { message } => println!("{message}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Pools => {
            match client.request(&ControlRequest::ListPools).await? {
                ControlResponse::Pools(pools) => {
                    let mut table =
                        new_table(vec!["ID", "NAME", "KIND", "STATUS", "WORKERS", "FREE"]);
                    for pool in pools {
                        table.add_row(vec![
                            pool.id.to_string(),
                            pool.name.clone(),
                            pool.kind.to_string(),
                            pool.status.to_string(),
                            format!(
                                "{}/{}",
                                pool.capacity.slots_used, pool.capacity.slots_total
                            ),
                            pool.capacity.available().to_string(),
                        ]);
                    }
                    println!("{table}");
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Pool { action } => handle_pool(client, action).await?,

        Command::Quotas => {
            match client.request(&ControlRequest::ListQuotas).await? {
                ControlResponse::Quotas(quotas) => {
                    let mut table =
                        new_table(vec!["NAMESPACE", "MODE", "CONCURRENT", "JOBS/HOUR"]);
                    for quota in quotas {
                        table.add_row(vec![
                            quota.namespace.clone(),
                            quota.mode.to_string(),
                            format!(
                                "{}/{}",
                                quota.usage.concurrent_jobs, quota.limits.max_concurrent_jobs
                            ),
                            quota.limits.max_jobs_per_hour.to_string(),
                        ]);
                    }
                    println!("{table}");
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Quota { action } => handle_quota(client, action).await?,

        Command::Stats => {
            match client.request(&ControlRequest::GetQueueStats).await? {
                ControlResponse::QueueStats(stats) => {
                    println!(
                        "queued {} | pending {} | running {} | completed {} | failed {} | cancelled {} | total {}",
                        stats.queued,
                        stats.pending,
                        stats.running,
                        stats.completed,
                        stats.failed,
                        stats.cancelled,
                        stats.total
                    );
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Command::Metrics => {
            match client.request(&ControlRequest::GetMetrics).await? {
                ControlResponse::Metrics { prometheus } => print!("{prometheus}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
    }
    Ok(())
}

async fn handle_pool(client: &ControlClient, action: PoolAction) -> Result<()> {
    let request = match action {
        PoolAction::Create { name, kind, slots } => ControlRequest::CreatePool { name, kind, slots },
        PoolAction::Drain {
            pool_id,
            timeout_secs,
            force,
        } => ControlRequest::DrainPool {
            pool_id,
            timeout_secs,
            force,
        },
        PoolAction::Resume { pool_id } => ControlRequest::ResumePool { pool_id },
        PoolAction::Maintenance {
            pool_id,
            reason,
            allow_new_jobs,
        } => ControlRequest::SetMaintenance {
            pool_id,
            reason,
            allow_new_jobs,
        },
        PoolAction::Delete { pool_id } => ControlRequest::DeletePool { pool_id },
    };
    match client.request(&request).await? {
        ControlResponse::Pool(pool) => println!("Pool {} is {}", pool.name, pool.status),
        ControlResponse::Ok { message } => println!("{message}"),
        other => bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

async fn handle_quota(client: &ControlClient, action: QuotaAction) -> Result<()> {
    let request = match action {
        QuotaAction::Set {
            namespace,
            mode,
            max_concurrent_jobs,
            max_cpu_millis,
            max_memory_mb,
            max_jobs_per_hour,
            max_jobs_per_day,
        } => {
            let mode = match mode.to_uppercase().as_str() {
                "ENFORCE" => QuotaPolicyMode::Enforce,
                "WARN" => QuotaPolicyMode::Warn,
                "MONITOR" => QuotaPolicyMode::Monitor,
                other => bail!("invalid quota mode '{other}' (ENFORCE|WARN|MONITOR)"),
            };
            ControlRequest::SetQuota {
                namespace,
                mode,
                limits: hodei_orchestrator::models::QuotaLimits {
                    max_concurrent_jobs,
                    max_cpu_millis,
                    max_memory_mb,
                    max_jobs_per_hour,
                    max_jobs_per_day,
                },
            }
        }
        QuotaAction::Delete { namespace } => ControlRequest::DeleteQuota { namespace },
    };
    match client.request(&request).await? {
        ControlResponse::Quota(quota) => {
            println!("Quota for '{}' set ({})", quota.namespace, quota.mode)
        }
        ControlResponse::Ok { message } => println!("{message}"),
        other => bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(header);
    table
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous".to_string())
}
