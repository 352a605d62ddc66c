//! Shell runner: executes a job's content and streams its output lines.

use crate::cancel::CancellationToken;
use anyhow::{Context, Result};
use hodei_protocol::{JobContent, LogStream};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One emitted output line.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: LogStream,
    pub line: String,
}

/// Outcome of running a job's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All commands finished; carries the last exit code (0 on success)
    Exited(i32),
    /// The cancellation token fired and the child was killed
    Cancelled,
}

/// Run a job's content through the shell, one command at a time, stopping on
/// the first non-zero exit. Output lines go to `output` as they appear.
/// Parameters are exposed as `HODEI_PARAM_<KEY>` environment variables.
///
/// Cancellation: a forced request kills the running child; a graceful one
/// lets the current command finish and skips everything after it. Either
/// way the outcome is `Cancelled`.
pub async fn run_content(
    content: &JobContent,
    env: &HashMap<String, String>,
    parameters: &HashMap<String, String>,
    cancel: &CancellationToken,
    output: mpsc::Sender<OutputLine>,
) -> Result<RunOutcome> {
    let commands: Vec<String> = match content {
        JobContent::Shell { commands } => commands.clone(),
        JobContent::Script { text } => vec![text.clone()],
    };

    for command in commands {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        match run_command(&command, env, parameters, cancel, &output).await? {
            RunOutcome::Exited(0) => continue,
            other => return Ok(other),
        }
    }
    // A graceful cancel that landed during the final command still reports
    // the run as cancelled; the job did not complete on its own terms.
    if cancel.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
    }
    Ok(RunOutcome::Exited(0))
}

async fn run_command(
    command: &str,
    env: &HashMap<String, String>,
    parameters: &HashMap<String, String>,
    cancel: &CancellationToken,
    output: &mpsc::Sender<OutputLine>,
) -> Result<RunOutcome> {
    debug!("Running: {}", command);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }
    for (key, value) in parameters {
        cmd.env(format!("HODEI_PARAM_{}", key.to_uppercase()), value);
    }

    let mut child = cmd.spawn().with_context(|| format!("Failed to spawn: {command}"))?;

    let stdout = child.stdout.take().context("child stdout missing")?;
    let stderr = child.stderr.take().context("child stderr missing")?;
    let stdout_task = forward_lines(stdout, LogStream::Stdout, output.clone());
    let stderr_task = forward_lines(stderr, LogStream::Stderr, output.clone());

    // Poll the cancellation token alongside the child so a forced abort
    // lands within one tick. A graceful request leaves the child alone;
    // run_content stops before the next command.
    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                if cancel.is_forced() {
                    warn!("Killing child on forced cancellation");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    stdout_task.await.ok();
                    stderr_task.await.ok();
                    return Ok(RunOutcome::Cancelled);
                }
            }
        }
    };

    stdout_task.await.ok();
    stderr_task.await.ok();

    let code = status.code().unwrap_or(-1);
    Ok(RunOutcome::Exited(code))
}

fn forward_lines<R>(
    reader: R,
    stream: LogStream,
    output: mpsc::Sender<OutputLine>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if output.send(OutputLine { stream, line }).await.is_err() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(
        content: JobContent,
    ) -> (RunOutcome, Vec<OutputLine>) {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let outcome = run_content(
            &content,
            &HashMap::new(),
            &HashMap::new(),
            &cancel,
            tx,
        )
        .await
        .unwrap();
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        (outcome, lines)
    }

    #[tokio::test]
    async fn test_echo_captures_stdout() {
        let (outcome, lines) = collect(JobContent::Shell {
            commands: vec!["echo ok".to_string()],
        })
        .await;
        assert_eq!(outcome, RunOutcome::Exited(0));
        assert!(lines.iter().any(|l| l.line == "ok" && l.stream == LogStream::Stdout));
    }

    #[tokio::test]
    async fn test_nonzero_exit_stops_sequence() {
        let (outcome, lines) = collect(JobContent::Shell {
            commands: vec![
                "echo first".to_string(),
                "exit 3".to_string(),
                "echo never".to_string(),
            ],
        })
        .await;
        assert_eq!(outcome, RunOutcome::Exited(3));
        assert!(lines.iter().any(|l| l.line == "first"));
        assert!(!lines.iter().any(|l| l.line == "never"));
    }

    #[tokio::test]
    async fn test_stderr_is_tagged() {
        let (outcome, lines) = collect(JobContent::Shell {
            commands: vec!["echo oops 1>&2".to_string()],
        })
        .await;
        assert_eq!(outcome, RunOutcome::Exited(0));
        assert!(lines.iter().any(|l| l.line == "oops" && l.stream == LogStream::Stderr));
    }

    #[tokio::test]
    async fn test_script_content_runs() {
        let (outcome, lines) = collect(JobContent::Script {
            text: "x=40; echo $((x + 2))".to_string(),
        })
        .await;
        assert_eq!(outcome, RunOutcome::Exited(0));
        assert!(lines.iter().any(|l| l.line == "42"));
    }

    #[tokio::test]
    async fn test_parameters_become_env() {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let mut parameters = HashMap::new();
        parameters.insert("region".to_string(), "eu-west".to_string());
        let outcome = run_content(
            &JobContent::Shell {
                commands: vec!["echo $HODEI_PARAM_REGION".to_string()],
            },
            &HashMap::new(),
            &parameters,
            &cancel,
            tx,
        )
        .await
        .unwrap();
        assert_eq!(outcome, RunOutcome::Exited(0));
        let line = rx.recv().await.unwrap();
        assert_eq!(line.line, "eu-west");
    }

    #[tokio::test]
    async fn test_forced_cancellation_kills_child() {
        let (tx, _rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            cancel_clone.cancel("operator kill", true);
        });

        let started = std::time::Instant::now();
        let outcome = run_content(
            &JobContent::Shell {
                commands: vec!["sleep 30".to_string()],
            },
            &HashMap::new(),
            &HashMap::new(),
            &cancel,
            tx,
        )
        .await
        .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_graceful_cancellation_finishes_current_command() {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel_clone.cancel("wrap up", false);
        });

        let outcome = run_content(
            &JobContent::Shell {
                commands: vec![
                    "sleep 0.4 && echo done".to_string(),
                    "echo never".to_string(),
                ],
            },
            &HashMap::new(),
            &HashMap::new(),
            &cancel,
            tx,
        )
        .await
        .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.line);
        }
        // The in-flight command ran to completion, the follow-up never did.
        assert!(lines.contains(&"done".to_string()));
        assert!(!lines.contains(&"never".to_string()));
    }
}
