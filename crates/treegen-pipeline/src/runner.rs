//! Bounded stage execution: one external command under a CPU-time ceiling.
//!
//! Each stage runs as the leader of its own process group with
//! `RLIMIT_CPU` set before `exec`. The kernel delivers `SIGXCPU` at the soft
//! limit and `SIGKILL` one second later. A supervisory wall-clock timer kills
//! the whole group if the stage stalls without burning CPU, and any
//! descendants still alive when the stage exits are killed too. Output pipes
//! get a short grace period once the stage is gone, so a descendant that left
//! the group cannot hold the runner open.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};
use treegen_core::FailureKind;

use crate::display::DisplayProbe;
use crate::error::StageError;
use crate::stage::StageInvocation;

const READ_CHUNK: usize = 8 * 1024;

/// How long output pipes may stay open after the stage has been reaped.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a stage process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with this code.
    Exited(i32),
    /// Terminated by a signal other than the CPU-limit ones.
    Signaled(i32),
    /// Killed for exceeding its CPU ceiling or the supervisory deadline.
    TimeoutKilled,
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit:{code}"),
            ExitOutcome::Signaled(sig) => write!(f, "signal:{sig}"),
            ExitOutcome::TimeoutKilled => write!(f, "timeout_killed"),
        }
    }
}

/// Result of a stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub stage_name: String,

    pub exit: ExitOutcome,

    /// Combined stdout and stderr, capped at the capture limit.
    pub output: String,

    /// Set when output was dropped because it exceeded the capture limit.
    pub truncated: bool,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the stage's expected output file exists after exit.
    pub artifact_exists: bool,
}

impl StageResult {
    /// Why this stage counts as failed, if it does.
    ///
    /// Exit codes are not trusted: a stage succeeds iff it was not killed and
    /// its output file exists.
    pub fn failure(&self) -> Option<FailureKind> {
        if self.exit == ExitOutcome::TimeoutKilled {
            Some(FailureKind::TimeoutKilled)
        } else if !self.artifact_exists {
            Some(FailureKind::MissingArtifact)
        } else {
            None
        }
    }

    pub fn passed(&self) -> bool {
        self.failure().is_none()
    }
}

/// Seam between the orchestrator and process execution.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageResult, StageError>;
}

/// Executes stages as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    display_probe: DisplayProbe,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display_probe(display_probe: DisplayProbe) -> Self {
        Self { display_probe }
    }

    /// Execute a single stage and return the result.
    pub async fn execute_stage(
        &self,
        invocation: &StageInvocation,
    ) -> Result<StageResult, StageError> {
        if let Some(display) = &invocation.display {
            self.display_probe.check(display)?;
        }

        let start = Instant::now();
        let cpu_secs = invocation.cpu_limit.as_secs().max(1);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        // SAFETY: the hook only calls setrlimit(2), which is async-signal-safe
        // and touches no memory shared with the parent.
        unsafe {
            command.pre_exec(move || apply_limits(cpu_secs));
        }

        let mut child = command.spawn().map_err(|source| StageError::Launch {
            program: invocation.program.clone(),
            source,
        })?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = invocation.capture_limit;
        let wall_limit = invocation.wall_limit;

        let supervise = async {
            let deadline_hit = tokio::time::timeout(wall_limit, wait_exited(pid))
                .await
                .is_err();
            if deadline_hit {
                warn!(
                    stage = %invocation.stage_name,
                    wall_limit_ms = wall_limit.as_millis() as u64,
                    "stage exceeded supervisory deadline, killing process group"
                );
            }
            // The leader is a zombie at most here, so its pid still names
            // this stage's group and cannot have been recycled.
            kill_group(pid);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, deadline_hit))
        };
        let drain = async {
            tokio::join!(read_bounded(stdout, limit), read_bounded(stderr, limit))
        };
        tokio::pin!(supervise);
        tokio::pin!(drain);

        let mut drained = None;
        let supervised = tokio::select! {
            supervised = &mut supervise => supervised,
            output = &mut drain => {
                drained = Some(output);
                supervise.as_mut().await
            }
        };
        // A descendant that left the group can hold the pipes open forever.
        let drained = match drained {
            Some(output) => Some(output),
            None => tokio::time::timeout(DRAIN_GRACE, drain).await.ok(),
        };

        let (status, deadline_hit) = supervised?;
        let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = match drained {
            Some((out, err)) => (out?, err?),
            None => {
                debug!(
                    stage = %invocation.stage_name,
                    "stage output still open after exit, abandoning pipes"
                );
                ((Vec::new(), true), (Vec::new(), true))
            }
        };

        let elapsed = start.elapsed();
        let exit = if deadline_hit {
            ExitOutcome::TimeoutKilled
        } else {
            classify(status, invocation.cpu_limit, elapsed)
        };
        let (output, combined_truncated) = combine(stdout, stderr, limit);

        Ok(StageResult {
            stage_name: invocation.stage_name.clone(),
            exit,
            output,
            truncated: stdout_truncated || stderr_truncated || combined_truncated,
            duration_ms: elapsed.as_millis() as u64,
            artifact_exists: output_exists(&invocation.expected_output).await,
        })
    }
}

#[async_trait]
impl StageExecutor for ProcessRunner {
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageResult, StageError> {
        self.execute_stage(invocation).await
    }
}

fn apply_limits(cpu_secs: u64) -> std::io::Result<()> {
    setrlimit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs + 1)?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    Ok(())
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "failed to signal stage process group"),
    }
}

/// Block until the stage leader has exited, without reaping it.
async fn wait_exited(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    let pid = Pid::from_raw(pid);
    let waited = tokio::task::spawn_blocking(move || loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    })
    .await;
    if let Ok(Err(e)) = waited {
        debug!(pid = pid.as_raw(), error = %e, "waitid on stage leader failed");
    }
}

/// SIGXCPU is only sent by the CPU rlimit. SIGKILL also arrives from the
/// rlimit's hard ceiling, one CPU-second after a stage ignores SIGXCPU, but
/// is only counted as a timeout once the stage has run at least as long as
/// its ceiling, the earliest a single-threaded tool can reach it. Earlier
/// kills come from elsewhere (OOM killer, operator).
fn classify(status: ExitStatus, cpu_limit: Duration, elapsed: Duration) -> ExitOutcome {
    if let Some(code) = status.code() {
        return ExitOutcome::Exited(code);
    }
    match status.signal() {
        Some(sig) if sig == Signal::SIGXCPU as i32 => ExitOutcome::TimeoutKilled,
        Some(sig) if sig == Signal::SIGKILL as i32 && elapsed >= cpu_limit => {
            ExitOutcome::TimeoutKilled
        }
        Some(sig) => ExitOutcome::Signaled(sig),
        None => ExitOutcome::Exited(-1),
    }
}

/// Drain a pipe to EOF, keeping at most `limit` bytes.
///
/// The pipe is always drained fully so a chatty tool never blocks on a full
/// pipe buffer.
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((kept, truncated))
}

fn combine(mut stdout: Vec<u8>, stderr: Vec<u8>, limit: usize) -> (String, bool) {
    stdout.extend_from_slice(&stderr);
    let truncated = stdout.len() > limit;
    stdout.truncate(limit);
    (String::from_utf8_lossy(&stdout).into_owned(), truncated)
}

async fn output_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
