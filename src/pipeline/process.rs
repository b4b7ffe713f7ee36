//! Process execution: run pdftoppm under an [`ExecContext`].
//!
//! The child is spawned as the leader of a fresh process group
//! (`process_group(0)`), so its pid doubles as the group id. The group is
//! owned by a [`ProcessGroupGuard`] for the whole call:
//!
//! * context cancelled or deadline passed: the group gets `SIGKILL` via
//!   `killpg` and the leader is reaped before we return;
//! * leader exited: the group is swept once more, so nothing it forked keeps
//!   running (or keeps our pipes open) after the call;
//! * future dropped mid-call (`tokio::time::timeout`, `select!`, task abort):
//!   the guard's `Drop` kills the group.
//!
//! stdout and stderr are drained on background tasks while the child runs,
//! otherwise a chatty child could fill the pipe buffer and deadlock. Joining
//! them still watches the context and is bounded by [`DRAIN_GRACE`].

use crate::context::ExecContext;
use crate::error::Pdf2PngError;
use crate::pipeline::command::CommandSpec;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for stdout/stderr to close once the leader has exited.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a successful (exit code 0) run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

enum Drained {
    Output(String, String),
    Cancelled,
    TimedOut,
}

/// Send `SIGKILL` to every process in group `pgid`.
///
/// `ESRCH` (group already empty) is expected and only logged at debug.
pub(crate) fn kill_process_group(pgid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: killpg only sends a signal. A pid is never recycled while a
        // process group with that id still has members.
        let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            debug!(
                "killpg({}) failed: {}",
                pgid,
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Kills the child's process group on drop unless disarmed.
pub(crate) struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    pub(crate) fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    pub(crate) fn kill(&self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
    }

    /// Release the group once it has been killed and the leader reaped.
    pub(crate) fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            warn!("Conversion abandoned; killing process group {}", pgid);
            kill_process_group(pgid);
        }
    }
}

/// Run `spec` to completion, or until `ctx` fires.
pub async fn run(spec: &CommandSpec, ctx: &ExecContext) -> Result<ProcessOutput, Pdf2PngError> {
    if ctx.is_cancelled() {
        return Err(Pdf2PngError::ExecutionCancelled);
    }
    if ctx.is_expired() {
        return Err(Pdf2PngError::ExecutionTimedOut {
            elapsed: ctx.timeout().unwrap_or_default(),
        });
    }

    let mut command = Command::new(&spec.executable);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| Pdf2PngError::SpawnFailed {
        program: spec.executable.clone(),
        source: e,
    })?;
    let pid = child.id();
    let guard = ProcessGroupGuard::new(pid);
    info!("Started {} (pid {:?})", spec.executable.display(), pid);

    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    let outcome = tokio::select! {
        biased;
        _ = ctx.token().cancelled() => Outcome::Cancelled,
        _ = ctx.expired() => Outcome::TimedOut,
        status = child.wait() => Outcome::Exited(status),
    };

    let status = match outcome {
        Outcome::Cancelled => {
            warn!("Context cancelled; killing pdftoppm process group {:?}", pid);
            terminate(&mut child, guard).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(Pdf2PngError::ExecutionCancelled);
        }
        Outcome::TimedOut => {
            warn!("Deadline exceeded; killing pdftoppm process group {:?}", pid);
            terminate(&mut child, guard).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(Pdf2PngError::ExecutionTimedOut {
                elapsed: start.elapsed(),
            });
        }
        Outcome::Exited(Err(e)) => {
            terminate(&mut child, guard).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(Pdf2PngError::Internal(format!(
                "waiting for pdftoppm failed: {e}"
            )));
        }
        Outcome::Exited(Ok(status)) => status,
    };

    // The leader is gone; anything it left behind in the group goes too.
    guard.kill();

    let stdout_abort = stdout_task.abort_handle();
    let stderr_abort = stderr_task.abort_handle();
    let drained = tokio::select! {
        biased;
        _ = ctx.token().cancelled() => Drained::Cancelled,
        _ = ctx.expired() => Drained::TimedOut,
        (stdout, stderr) = async {
            tokio::join!(join_output(stdout_task), join_output(stderr_task))
        } => Drained::Output(stdout, stderr),
    };
    guard.disarm();

    let (stdout, stderr) = match drained {
        Drained::Output(stdout, stderr) => (stdout, stderr),
        Drained::Cancelled => {
            stdout_abort.abort();
            stderr_abort.abort();
            return Err(Pdf2PngError::ExecutionCancelled);
        }
        Drained::TimedOut => {
            stdout_abort.abort();
            stderr_abort.abort();
            return Err(Pdf2PngError::ExecutionTimedOut {
                elapsed: start.elapsed(),
            });
        }
    };

    debug!(
        "pdftoppm exited with {} after {}ms",
        status,
        start.elapsed().as_millis()
    );
    if !stderr.trim().is_empty() {
        debug!("pdftoppm stderr: {}", stderr.trim());
    }

    if status.success() {
        Ok(ProcessOutput { stdout, stderr })
    } else {
        Err(Pdf2PngError::ExecutionFailed {
            status: describe_status(status),
            stderr: stderr.trim().to_string(),
        })
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

/// Collect a drain task's bytes, giving up after [`DRAIN_GRACE`].
///
/// A descendant that escaped the group (e.g. via `setsid`) can hold the pipe
/// open forever; its output is dropped rather than blocking the call.
async fn join_output(task: JoinHandle<Vec<u8>>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            abort.abort();
            warn!(
                "Output pipe still open {}ms after pdftoppm exited; discarding",
                DRAIN_GRACE.as_millis()
            );
            String::new()
        }
    }
}

/// Kill the child's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child, guard: ProcessGroupGuard) {
    guard.kill();
    if let Err(e) = child.kill().await {
        debug!("kill after killpg: {}", e);
    }
    guard.disarm();
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return format!("signal {sig}");
        }
    }
    status.to_string()
}
