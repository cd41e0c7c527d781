//! External command execution.
//!
//! [`run`] executes a command to completion under a timeout and always
//! resolves to a [`CommandOutput`], whatever goes wrong. [`spawn`] starts a
//! command without waiting so the caller can poll it from its own loop and
//! [`RunningCommand::collect`] the output once it has exited.

use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::CoreError;

/// Maximum stdout or stderr size captured per stream (1 MiB).
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long output is still read after the process itself has exited.
///
/// Background grandchildren can inherit the pipes and keep them open
/// indefinitely; whatever arrived within this window is kept.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

/// An external command: program plus arguments.
///
/// Operator-supplied command lines go through [`CommandSpec::shell`] so
/// they keep their shell semantics; internal probes (`pgrep`, `pkill`) use
/// [`CommandSpec::argv`] so no intermediate shell shows up in the process
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    label: String,
}

impl CommandSpec {
    /// Run `line` through `sh -c`.
    pub fn shell(line: impl Into<String>) -> Self {
        let line = line.into();
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), line.clone()],
            label: line,
        }
    }

    /// Run `program` directly with `args`.
    pub fn argv<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let label = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            label,
        }
    }

    /// Split a whitespace-separated command line into an argv spec.
    ///
    /// Returns `None` for a blank line.
    pub fn from_words(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::argv(program, words))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a fresh [`Command`] for this spec with stdin closed.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

/// Why a command produced no exit status of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFailure {
    /// The command exceeded its timeout and was killed.
    Timeout { after_secs: u64 },
    /// The command could not be started (missing binary, permissions, ...).
    Launch,
}

/// Result of one command execution.
///
/// `stdout` and `stderr` are trimmed. When `failure` is set, `stderr`
/// carries the failure text instead of process output.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`None` if killed by a signal or never started).
    pub exit_code: Option<i32>,
    pub failure: Option<CommandFailure>,
}

impl CommandOutput {
    fn launch_failed(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: None,
            failure: Some(CommandFailure::Launch),
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
            exit_code: None,
            failure: Some(CommandFailure::Timeout {
                after_secs: timeout.as_secs(),
            }),
        }
    }

    /// The typed error behind a timeout or launch failure, if any.
    ///
    /// A command that ran and exited non-zero is not an error here; callers
    /// inspect `succeeded` and `stderr` for that.
    pub fn failure_error(&self, spec: &CommandSpec) -> Option<CoreError> {
        match self.failure? {
            CommandFailure::Timeout { after_secs } => Some(CoreError::CommandTimeout {
                command: spec.to_string(),
                timeout: Duration::from_secs(after_secs),
            }),
            CommandFailure::Launch => Some(CoreError::CommandLaunchFailure {
                command: spec.to_string(),
                reason: self.stderr.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// run / spawn
// ---------------------------------------------------------------------------

/// Execute `spec`, wait at most `timeout`, and capture its output.
///
/// Never fails: launch errors and timeouts are reported through
/// [`CommandOutput::failure`]. On timeout the child is killed.
pub async fn run(spec: &CommandSpec, timeout: Duration) -> CommandOutput {
    if timeout.is_zero() {
        return CommandOutput::launch_failed("timeout must be greater than zero");
    }

    let mut cmd = spec.to_command();
    // `kill_on_drop(true)` ensures the child is killed when dropped on timeout.
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(command = %spec, error = %e, "Command launch failed");
            return CommandOutput::launch_failed(e.to_string());
        }
    };

    let (stdout, stderr) = capture_streams(&mut child);

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let (stdout, stderr) = tokio::join!(
                stdout.finish(OUTPUT_DRAIN_GRACE),
                stderr.finish(OUTPUT_DRAIN_GRACE)
            );
            CommandOutput {
                succeeded: status.success(),
                stdout,
                stderr,
                exit_code: status.code(),
                failure: None,
            }
        }
        Ok(Err(e)) => CommandOutput::launch_failed(e.to_string()),
        Err(_elapsed) => {
            drop(child);
            tracing::debug!(command = %spec, timeout_secs = timeout.as_secs(), "Command timed out");
            CommandOutput::timed_out(timeout)
        }
    }
}

/// Start `spec` without waiting for it.
///
/// The child is not killed when the handle is dropped: a restart command
/// must be allowed to finish even if nobody observes it any more.
pub fn spawn(spec: &CommandSpec) -> Result<RunningCommand, CoreError> {
    let mut cmd = spec.to_command();
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| CoreError::CommandLaunchFailure {
        command: spec.to_string(),
        reason: e.to_string(),
    })?;

    let (stdout, stderr) = capture_streams(&mut child);

    Ok(RunningCommand {
        label: spec.to_string(),
        child,
        stdout,
        stderr,
    })
}

/// A command started by [`spawn`].
pub struct RunningCommand {
    label: String,
    child: Child,
    stdout: StreamCapture,
    stderr: StreamCapture,
}

impl RunningCommand {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking exit check.
    ///
    /// An error from the OS is treated as "exited" so the caller moves on
    /// to [`collect`](Self::collect), which reports it.
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(status) => status.is_some(),
            Err(e) => {
                tracing::warn!(command = %self.label, error = %e, "Failed to poll command status");
                true
            }
        }
    }

    /// Wait for exit and return the captured output.
    ///
    /// Output still arriving shortly after exit is kept; pipes held open by
    /// background grandchildren are not waited on.
    pub async fn collect(mut self) -> CommandOutput {
        match self.child.wait().await {
            Ok(status) => {
                let (stdout, stderr) = tokio::join!(
                    self.stdout.finish(OUTPUT_DRAIN_GRACE),
                    self.stderr.finish(OUTPUT_DRAIN_GRACE)
                );
                CommandOutput {
                    succeeded: status.success(),
                    stdout,
                    stderr,
                    exit_code: status.code(),
                    failure: None,
                }
            }
            Err(e) => CommandOutput::launch_failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Ask `child` to exit with SIGTERM.
///
/// Returns `false` if the child has already been reaped or the signal could
/// not be delivered.
#[cfg(unix)]
pub fn request_terminate(child: &mut Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // Safety: `pid` belongs to a child we have not reaped yet, so it cannot
    // have been recycled for an unrelated process.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub fn request_terminate(child: &mut Child) -> bool {
    child.start_kill().is_ok()
}

// ---------------------------------------------------------------------------
// Stream capture
// ---------------------------------------------------------------------------

/// Output of one pipe, read by a background task into a shared buffer.
///
/// The reader is aborted when the capture is finished or dropped.
struct StreamCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl StreamCapture {
    fn start<R>(handle: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let reader = tokio::spawn(read_stream(handle, Arc::clone(&buf)));
        Self { buf, reader }
    }

    /// Wait up to `grace` for EOF, then return what was read, trimmed.
    async fn finish(mut self, grace: Duration) -> String {
        if tokio::time::timeout(grace, &mut self.reader).await.is_err() {
            tracing::debug!(grace_ms = grace.as_millis() as u64, "Output pipe still open after exit");
        }
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner));
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn capture_streams(child: &mut Child) -> (StreamCapture, StreamCapture) {
    (
        StreamCapture::start(child.stdout.take()),
        StreamCapture::start(child.stderr.take()),
    )
}

/// Append an output stream to `buf` chunk by chunk, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, buf: Arc<Mutex<Vec<u8>>>) {
    let Some(mut h) = handle else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = match h.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let mut buf = buf.lock().unwrap_or_else(PoisonError::into_inner);
        let room = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const FIVE_SECS: Duration = Duration::from_secs(5);

    #[test]
    fn shell_spec_displays_the_line() {
        let spec = CommandSpec::shell("systemctl daemon-reload");
        assert_eq!(spec.program(), "sh");
        assert_eq!(spec.args(), ["-c", "systemctl daemon-reload"]);
        assert_eq!(spec.to_string(), "systemctl daemon-reload");
    }

    #[test]
    fn from_words_splits_on_whitespace() {
        let spec = CommandSpec::from_words("journalctl  -u pkg-ContainerManager-dockerd.service -f")
            .expect("non-blank line");
        assert_eq!(spec.program(), "journalctl");
        assert_eq!(spec.args(), ["-u", "pkg-ContainerManager-dockerd.service", "-f"]);
        assert!(CommandSpec::from_words("   ").is_none());
    }

    #[tokio::test]
    async fn run_captures_trimmed_stdout() {
        let out = run(&CommandSpec::shell("echo '  hello  '"), FIVE_SECS).await;
        assert!(out.succeeded);
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.exit_code, Some(0));
        assert!(out.failure.is_none());
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let out = run(&CommandSpec::shell("echo oops >&2; exit 3"), FIVE_SECS).await;
        assert!(!out.succeeded);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr, "oops");
        assert!(out.failure.is_none());
    }

    #[tokio::test]
    async fn run_times_out() {
        let spec = CommandSpec::shell("sleep 10");
        let out = run(&spec, Duration::from_secs(1)).await;
        assert!(!out.succeeded);
        assert_eq!(out.failure, Some(CommandFailure::Timeout { after_secs: 1 }));
        assert_eq!(out.stderr, "Command timed out after 1s");
        assert_matches!(
            out.failure_error(&spec),
            Some(CoreError::CommandTimeout { timeout, .. }) if timeout == Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn run_reports_launch_failure() {
        let spec = CommandSpec::argv("/nonexistent/cmctl-test-binary", ["--flag"]);
        let out = run(&spec, FIVE_SECS).await;
        assert!(!out.succeeded);
        assert_eq!(out.failure, Some(CommandFailure::Launch));
        assert!(!out.stderr.is_empty());
        assert_matches!(
            out.failure_error(&spec),
            Some(CoreError::CommandLaunchFailure { .. })
        );
    }

    #[tokio::test]
    async fn run_rejects_zero_timeout() {
        let out = run(&CommandSpec::shell("true"), Duration::ZERO).await;
        assert!(!out.succeeded);
        assert_eq!(out.failure, Some(CommandFailure::Launch));
    }

    #[tokio::test]
    async fn spawned_command_can_be_polled_and_collected() {
        let mut running =
            spawn(&CommandSpec::shell("echo restarted; echo warn >&2")).expect("spawn");
        assert!(running.pid().is_some());

        for _ in 0..100 {
            if running.has_exited() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(running.has_exited());

        let out = running.collect().await;
        assert!(out.succeeded);
        assert_eq!(out.stdout, "restarted");
        assert_eq!(out.stderr, "warn");
    }

    #[tokio::test]
    async fn run_does_not_wait_for_background_grandchildren() {
        let started = std::time::Instant::now();
        let out = run(&CommandSpec::shell("sleep 4 & echo running"), Duration::from_secs(1)).await;
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "run took {:?}",
            started.elapsed()
        );
        assert!(out.succeeded);
        assert_eq!(out.stdout, "running");
    }

    #[tokio::test]
    async fn collect_returns_promptly_when_a_daemon_holds_the_pipes() {
        let mut running = spawn(&CommandSpec::shell("sleep 4 & echo daemon started")).expect("spawn");
        for _ in 0..100 {
            if running.has_exited() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(running.has_exited());

        let started = std::time::Instant::now();
        let out = running.collect().await;
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "collect took {:?}",
            started.elapsed()
        );
        assert!(out.succeeded);
        assert_eq!(out.stdout, "daemon started");
    }

    #[tokio::test]
    async fn spawn_missing_binary_is_launch_failure() {
        let result = spawn(&CommandSpec::argv(
            "/nonexistent/cmctl-test-binary",
            Vec::<String>::new(),
        ))
        .map(|_| ());
        assert_matches!(result, Err(CoreError::CommandLaunchFailure { .. }));
    }
}
