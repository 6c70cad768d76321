//! Task command execution

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskId};

/// Captured result of running a task command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Process exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ExecutionOutput {
    /// Whether the command exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the command behind a task
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute a task, streaming output lines to the reporter.
    ///
    /// Must return [`ExecutionError::Cancelled`] promptly once `cancel` fires.
    async fn execute(
        &self,
        task: &Task,
        reporter: &dyn TaskReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Executes task commands through the platform shell from the workspace root
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workspace_root: PathBuf,
}

impl ShellExecutor {
    /// Create an executor rooted at the workspace
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn command(&self, task: &Task) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&task.command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&task.command);
            cmd
        };

        cmd.current_dir(&self.workspace_root)
            .env("STRATA_PROJECT", &task.id.project)
            .env("STRATA_PROJECT_ROOT", &task.project_root)
            .env("STRATA_TARGET", &task.id.target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(
        &self,
        task: &Task,
        reporter: &dyn TaskReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        debug!(task = %task.id, command = %task.command, "spawning");
        let mut child = self
            .command(task)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: task.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (stdout, stderr) = tokio::join!(
                read_lines(&task.id, stdout, false, reporter),
                read_lines(&task.id, stderr, true, reporter),
            );
            let status = child.wait().await.map_err(ExecutionError::Wait)?;
            Ok::<_, ExecutionError>(ExecutionOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = %task.id, "cancelled, killing child");
                Err(ExecutionError::Cancelled)
            }
            result = run => result,
        }
    }
}

/// Read a pipe line by line, reporting each line as it arrives.
///
/// Invalid UTF-8 is replaced rather than ending the read, so the pipe is
/// always drained to EOF.
async fn read_lines<R>(
    id: &TaskId,
    pipe: Option<R>,
    is_stderr: bool,
    reporter: &dyn TaskReporter,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(pipe) = pipe else {
        return captured;
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(task = %id, error = %e, is_stderr, "failed to read task output");
                break;
            }
        }

        let decoded = String::from_utf8_lossy(&buf);
        let chunk: &str = &decoded;
        let line = chunk.strip_suffix('\n').unwrap_or(chunk);
        let line = line.strip_suffix('\r').unwrap_or(line);
        reporter.report(&TaskEvent::Output {
            id: id.clone(),
            line: line.to_string(),
            is_stderr,
            replayed: false,
        });
        captured.push_str(chunk);
    }
    captured
}

/// Errors while executing a task command
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The shell could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the child failed
    #[error("Failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    /// The run was cancelled while the command was in flight
    #[error("Cancelled")]
    Cancelled,
}
