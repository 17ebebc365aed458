//! Shell command tool (spec §4.6): spawns a command through a shell,
//! streaming stdout/stderr, after the trusted-cwd and scope guards in
//! [`crate::guard`] pass.
//!
//! A spawn-and-stream pattern: the child process's stdout/stderr are
//! drained concurrently into a [`ShellStreamSink`] while the
//! [`ShellProcessRegistry`] tracks the execution's state-machine
//! transitions alongside it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::guard::{self, GuardError, TrustContext};
use crate::registry::{ActiveHandle, RegistryError, ShellExecutionRecord, ShellProcessRegistry, ShellStatus, TransitionPatch};

#[derive(Debug, thiserror::Error)]
pub enum ShellToolError {
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct ShellToolRequest {
    pub command: String,
    pub parameters: Vec<String>,
    /// A `directory` override from the LLM's tool-call arguments, if any
    /// — subject to the directory-mismatch guard, never trusted as-is.
    pub directory: Option<String>,
    pub world_id: Option<String>,
    pub chat_id: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Where stdout/stderr chunks go as they arrive — the orchestration
/// core wires this to the world's `tool-stream` SSE channel (spec §4.6).
pub trait ShellStreamSink: Send + Sync {
    fn on_chunk(&self, execution_id: &str, stream: StreamKind, chunk: &str);
}

struct KillHandle(mpsc::Sender<()>);

impl ActiveHandle for KillHandle {
    fn request_terminate(&self) {
        let _ = self.0.try_send(());
    }
}

pub struct ShellCommandTool {
    registry: Arc<ShellProcessRegistry>,
    sink: Arc<dyn ShellStreamSink>,
    default_timeout_ms: u64,
}

impl ShellCommandTool {
    pub fn new(registry: Arc<ShellProcessRegistry>, sink: Arc<dyn ShellStreamSink>, default_timeout_ms: u64) -> Self {
        Self {
            registry,
            sink,
            default_timeout_ms,
        }
    }

    /// Runs the three pre-spawn guards, then spawns and streams the
    /// command, blocking until it reaches a terminal state. Returns the
    /// final execution record (never an `Err` for a command that merely
    /// failed or was canceled — those are terminal statuses, not this
    /// function's errors).
    pub async fn execute(&self, req: ShellToolRequest, trust: &TrustContext) -> Result<ShellExecutionRecord, ShellToolError> {
        let command = req.command.clone();
        let span = tracing::info_span!("shell.execute", command = %command);
        self.execute_inner(req, trust).instrument(span).await
    }

    async fn execute_inner(&self, req: ShellToolRequest, trust: &TrustContext) -> Result<ShellExecutionRecord, ShellToolError> {
        let trusted_cwd = trust.resolve_trusted_cwd();
        let execution_dir: PathBuf = guard::enforce_directory(&trusted_cwd, req.directory.as_deref())?;

        let tokens = guard::tokenize(&req.command, &req.parameters);
        guard::enforce_path_scope(&execution_dir, &tokens)?;
        guard::enforce_no_inline_script(&tokens)?;

        let quoted_params: Vec<String> = req.parameters.iter().map(|p| guard::quote_if_needed(p)).collect();
        let full_command = if quoted_params.is_empty() {
            req.command.clone()
        } else {
            format!("{} {}", req.command, quoted_params.join(" "))
        };

        let record = self.registry.create(
            req.command.clone(),
            req.parameters.clone(),
            execution_dir.display().to_string(),
            req.world_id.clone(),
            req.chat_id.clone(),
        );
        let execution_id = record.execution_id.clone();
        tracing::debug!(execution_id = %execution_id, directory = %execution_dir.display(), "shell command starting");

        self.registry.transition(&execution_id, ShellStatus::Starting, TransitionPatch::default())?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&full_command);
        cmd.current_dir(&execution_dir);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(execution_id = %execution_id, error = %e, "failed to spawn shell command");
                let record = self.registry.transition(
                    &execution_id,
                    ShellStatus::Failed,
                    TransitionPatch {
                        error: Some(format!("failed to spawn: {e}")),
                        ..Default::default()
                    },
                )?;
                return Ok(record);
            }
        };

        self.registry.transition(&execution_id, ShellStatus::Running, TransitionPatch::default())?;

        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        self.registry.attach_handle(&execution_id, Arc::new(KillHandle(kill_tx)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let timeout_ms = req.timeout_ms.unwrap_or(self.default_timeout_ms);

        let mut stdout_len = 0usize;
        let mut stderr_len = 0usize;

        let stdout_sink = self.sink.clone();
        let stdout_id = execution_id.clone();
        let stdout_task = tokio::spawn(async move {
            let mut total = 0usize;
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    total += line.len() + 1;
                    stdout_sink.on_chunk(&stdout_id, StreamKind::Stdout, &line);
                }
            }
            total
        });

        let stderr_sink = self.sink.clone();
        let stderr_id = execution_id.clone();
        let stderr_task = tokio::spawn(async move {
            let mut total = 0usize;
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    total += line.len() + 1;
                    stderr_sink.on_chunk(&stderr_id, StreamKind::Stderr, &line);
                }
            }
            total
        });

        let timeout_dur = std::time::Duration::from_millis(timeout_ms);
        let outcome = tokio::select! {
            result = child.wait() => Outcome::Exited(result),
            _ = kill_rx.recv() => Outcome::Canceled,
            _ = tokio::time::sleep(timeout_dur) => Outcome::TimedOut,
        };

        if matches!(outcome, Outcome::Canceled | Outcome::TimedOut) {
            let _ = child.kill().await;
        }
        stdout_len += stdout_task.await.unwrap_or(0);
        stderr_len += stderr_task.await.unwrap_or(0);

        let patch = TransitionPatch {
            stdout_len: Some(stdout_len),
            stderr_len: Some(stderr_len),
            ..Default::default()
        };

        let final_status = match outcome {
            Outcome::Exited(Ok(status)) if status.success() => ShellStatus::Completed,
            Outcome::Exited(Ok(_)) => ShellStatus::Failed,
            Outcome::Exited(Err(_)) => ShellStatus::Failed,
            Outcome::Canceled => ShellStatus::Canceled,
            Outcome::TimedOut => ShellStatus::TimedOut,
        };
        let patch = TransitionPatch {
            exit_code: if let Outcome::Exited(Ok(status)) = &outcome { status.code() } else { None },
            ..patch
        };

        if final_status == ShellStatus::Completed {
            tracing::debug!(execution_id = %execution_id, ?final_status, "shell command finished");
        } else {
            tracing::warn!(execution_id = %execution_id, ?final_status, "shell command did not complete successfully");
        }

        let record = self.registry.transition(&execution_id, final_status, patch)?;
        Ok(record)
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Canceled,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct RecordingSink {
        lines: Mutex<Vec<(StreamKind, String)>>,
    }

    impl ShellStreamSink for RecordingSink {
        fn on_chunk(&self, _execution_id: &str, stream: StreamKind, chunk: &str) {
            self.lines.lock().push((stream, chunk.to_string()));
        }
    }

    fn tool(registry: Arc<ShellProcessRegistry>, sink: Arc<RecordingSink>) -> ShellCommandTool {
        ShellCommandTool::new(registry, sink, 5_000)
    }

    #[tokio::test]
    async fn execute_runs_command_and_streams_stdout() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ShellProcessRegistry::new(2000));
        let sink = Arc::new(RecordingSink { lines: Mutex::new(Vec::new()) });
        let t = tool(registry.clone(), sink.clone());

        let trust = TrustContext {
            explicit_working_directory: Some(dir.path().to_str().unwrap().to_string()),
            world_variables_block: None,
            process_default: "/".into(),
        };
        let req = ShellToolRequest {
            command: "echo".into(),
            parameters: vec!["hello".into()],
            directory: None,
            world_id: Some("w1".into()),
            chat_id: Some("c1".into()),
            timeout_ms: None,
        };

        let record = t.execute(req, &trust).await.unwrap();
        assert_eq!(record.status, ShellStatus::Completed);
        assert_eq!(record.exit_code, Some(0));
        assert!(sink.lines.lock().iter().any(|(k, l)| *k == StreamKind::Stdout && l == "hello"));
    }

    #[tokio::test]
    async fn execute_rejects_out_of_scope_directory() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let registry = Arc::new(ShellProcessRegistry::new(2000));
        let sink = Arc::new(RecordingSink { lines: Mutex::new(Vec::new()) });
        let t = tool(registry, sink);

        let trust = TrustContext {
            explicit_working_directory: Some(dir.path().to_str().unwrap().to_string()),
            world_variables_block: None,
            process_default: "/".into(),
        };
        let req = ShellToolRequest {
            command: "ls".into(),
            parameters: vec![],
            directory: Some(outside.path().to_str().unwrap().to_string()),
            world_id: None,
            chat_id: None,
            timeout_ms: None,
        };

        let err = t.execute(req, &trust).await.unwrap_err();
        assert!(matches!(err, ShellToolError::Guard(GuardError::DirectoryMismatch(_))));
    }

    #[tokio::test]
    async fn execute_reports_nonzero_exit_as_failed() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ShellProcessRegistry::new(2000));
        let sink = Arc::new(RecordingSink { lines: Mutex::new(Vec::new()) });
        let t = tool(registry, sink);

        let trust = TrustContext {
            explicit_working_directory: Some(dir.path().to_str().unwrap().to_string()),
            world_variables_block: None,
            process_default: "/".into(),
        };
        let req = ShellToolRequest {
            command: "false".into(),
            parameters: vec![],
            directory: None,
            world_id: None,
            chat_id: None,
            timeout_ms: None,
        };

        let record = t.execute(req, &trust).await.unwrap();
        assert_eq!(record.status, ShellStatus::Failed);
        assert_ne!(record.exit_code, Some(0));
    }
}
