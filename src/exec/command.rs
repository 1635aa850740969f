// src/exec/command.rs

use std::process::Stdio;
use std::time::{Duration, SystemTime};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::exec::spec::RunSpec;

/// Timeout applied when a run config does not name one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A completed subprocess capture.
///
/// A non-zero exit is a *successful capture* with `success = false`; only
/// failures to launch or read the process surface as [`RunError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub started_at: SystemTime,
    pub stopped_at: SystemTime,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn runtime(&self) -> Duration {
        self.stopped_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

/// Why the runner itself failed.
///
/// Every variant carries the best-effort capture available at the time of
/// failure, so callers that record failures anyway have something to record.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("command timed out after {timeout:?}")]
    Deadline {
        timeout: Duration,
        partial: Box<RunResult>,
    },
    #[error("i/o failure running command: {source}")]
    Io {
        source: std::io::Error,
        partial: Box<RunResult>,
    },
}

impl RunError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, RunError::Deadline { .. })
    }

    /// The partial capture to record in place of a real result.
    pub fn into_partial(self) -> RunResult {
        match self {
            RunError::Deadline { partial, .. } | RunError::Io { partial, .. } => *partial,
        }
    }
}

/// Run `spec` to completion, feeding `input` to its stdin when given.
///
/// The child is placed in its own process group; when `timeout` expires the
/// whole group is SIGKILLed and the call returns a deadline error carrying
/// whatever output was captured up to that point. A `timeout` of zero means
/// no deadline.
pub async fn run(
    spec: &RunSpec,
    timeout: Duration,
    input: Option<&str>,
) -> Result<RunResult, RunError> {
    let started_at = SystemTime::now();

    let mut cmd = Command::new(spec.program());
    cmd.args(spec.args())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| io_error(e, started_at))?;

    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            let buf = input.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = stdin.write_all(&buf).await;
                let _ = stdin.shutdown().await;
            });
        }
    }

    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| io_error(e, started_at))?,
        _ = deadline(timeout) => {
            kill_group(&child);
            let _ = child.wait().await;
            let partial = collect(started_at, false, stdout_task, stderr_task).await;
            return Err(RunError::Deadline {
                timeout,
                partial: Box::new(partial),
            });
        }
    };

    Ok(collect(started_at, status.success(), stdout_task, stderr_task).await)
}

async fn deadline(timeout: Duration) {
    if timeout.is_zero() {
        std::future::pending::<()>().await
    } else {
        tokio::time::sleep(timeout).await
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

async fn collect(
    started_at: SystemTime,
    success: bool,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
) -> RunResult {
    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();
    RunResult {
        started_at,
        stopped_at: SystemTime::now(),
        success,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}

fn io_error(source: std::io::Error, started_at: SystemTime) -> RunError {
    RunError::Io {
        source,
        partial: Box::new(RunResult {
            started_at,
            stopped_at: SystemTime::now(),
            success: false,
            stdout: String::new(),
            stderr: String::new(),
        }),
    }
}

/// SIGKILL the child's process group. The child was spawned with
/// `process_group(0)`, so its pid doubles as the group id and descendants
/// die with it.
fn kill_group(child: &Child) {
    if let Some(pid) = child.id() {
        if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %err, "killpg after deadline failed");
        }
    }
}
