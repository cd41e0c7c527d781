//! Follower for the service's system journal.
//!
//! [`JournalTailer`] keeps at most one long-running follow process (by
//! default `journalctl -u ... -f`) alive and hands its output to the
//! coordinator one line at a time without ever blocking. Stdout is pumped
//! into a channel by a background reader task; the coordinator drains the
//! channel from its own loop. The follower's stderr is discarded.
//!
//! Before every start and after every stop, any stray follower matching the
//! configured kill pattern is SIGKILLed so repeated sessions never pile up
//! orphaned `journalctl` processes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use cmctl_core::error::CoreError;
use cmctl_core::process::{self, CommandSpec};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a follower gets to exit after SIGTERM before it is killed.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Timeout for the `pkill` sweep.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines buffered between the reader tasks and the coordinator.
const LINE_BUFFER: usize = 4096;

// ---------------------------------------------------------------------------
// LogFollower
// ---------------------------------------------------------------------------

/// A source of service log lines the coordinator can drain while it works.
#[async_trait]
pub trait LogFollower: Send {
    /// Start (or restart) following. Any previous follower is stopped first.
    async fn start(&mut self) -> Result<(), CoreError>;

    /// Return the next buffered line, or `None` if nothing is buffered.
    /// Never waits.
    fn read_line_nonblocking(&mut self) -> Option<String>;

    /// Stop following. Safe to call when nothing is running.
    async fn stop(&mut self);

    fn is_running(&self) -> bool;
}

// ---------------------------------------------------------------------------
// JournalTailer
// ---------------------------------------------------------------------------

struct FollowHandle {
    child: Child,
    reader: Option<JoinHandle<()>>,
    lines: mpsc::Receiver<String>,
}

/// [`LogFollower`] backed by an external follow command.
pub struct JournalTailer {
    follow: CommandSpec,
    kill_pattern: String,
    grace: Duration,
    handle: Option<FollowHandle>,
}

impl JournalTailer {
    pub fn new(follow: CommandSpec, kill_pattern: impl Into<String>) -> Self {
        Self {
            follow,
            kill_pattern: kill_pattern.into(),
            grace: DEFAULT_GRACE_PERIOD,
            handle: None,
        }
    }

    /// Override how long a follower may take to exit after SIGTERM.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// PID of the tracked follower, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.child.id())
    }

    /// Terminate the tracked follower: SIGTERM, wait up to the grace
    /// period, then SIGKILL.
    async fn stop_tracked(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        let pid = handle.child.id();

        if process::request_terminate(&mut handle.child) {
            match tokio::time::timeout(self.grace, handle.child.wait()).await {
                Ok(_) => tracing::debug!(?pid, "Log follower exited"),
                Err(_) => {
                    tracing::warn!(
                        ?pid,
                        grace_secs = self.grace.as_secs(),
                        "Log follower ignored SIGTERM, killing"
                    );
                    let _ = handle.child.kill().await;
                }
            }
        } else {
            let _ = handle.child.kill().await;
        }

        if let Some(reader) = handle.reader {
            reader.abort();
        }
    }

    /// SIGKILL every process matching the kill pattern.
    async fn kill_strays(&self) {
        // `pkill -f ''` would match every process on the host.
        if self.kill_pattern.trim().is_empty() {
            return;
        }
        let spec = CommandSpec::argv("pkill", ["-9", "-f", self.kill_pattern.as_str()]);
        let output = process::run(&spec, CLEANUP_TIMEOUT).await;
        match output.exit_code {
            Some(0) => tracing::info!(pattern = %self.kill_pattern, "Killed stray log followers"),
            // pkill exits 1 when nothing matched.
            Some(1) => {}
            _ => tracing::debug!(
                pattern = %self.kill_pattern,
                stderr = %output.stderr,
                "Stray follower cleanup failed"
            ),
        }
    }
}

#[async_trait]
impl LogFollower for JournalTailer {
    async fn start(&mut self) -> Result<(), CoreError> {
        self.stop_tracked().await;
        self.kill_strays().await;

        let mut cmd = self.follow.to_command();
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            CoreError::TailerSupervisionFailure(format!("failed to start '{}': {e}", self.follow))
        })?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        let reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(pump_lines(stdout, tx)));

        tracing::info!(pid = ?child.id(), command = %self.follow, "Started log follower");
        self.handle = Some(FollowHandle {
            child,
            reader,
            lines,
        });
        Ok(())
    }

    fn read_line_nonblocking(&mut self) -> Option<String> {
        let handle = self.handle.as_mut()?;
        loop {
            match handle.lines.try_recv() {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        return Some(line.to_string());
                    }
                }
                Err(_) => return None,
            }
        }
    }

    async fn stop(&mut self) {
        self.stop_tracked().await;
        self.kill_strays().await;
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Log follower read failed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
