//! Single-flight restart sessions.
//!
//! [`RestartCoordinator`] owns the only mutable restart state in the
//! process. A trigger either starts a background session or is rejected
//! because one is already running. A session walks through:
//!
//! 1. start the log follower (failure is a warning, not fatal)
//! 2. run the reload command (failure is a warning)
//! 3. spawn the chosen restart command and drain journal lines while it runs
//! 4. poll service status until it reports running, or the user stops it
//!
//! and always ends with exactly one terminal event on the [`EventBus`].
//! The session counts as active until its worker has fully exited, so two
//! workers never overlap.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use cmctl_core::error::CoreError;
use cmctl_core::log_event::{LogEvent, LogSource, Outcome};
use cmctl_core::process::{self, CommandOutput};
use cmctl_core::status::ServiceStatus;
use cmctl_core::types::{SessionId, Timestamp};
use cmctl_events::EventBus;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{RestartCommands, RestartConfig, RestartVariant, SessionTiming};
use crate::poller::{StatusPoller, StatusProbe};
use crate::tailer::{JournalTailer, LogFollower};
use crate::ticker::{Ticker, TokioTicker};

/// Text of the progress event that precedes a user-requested stop.
pub const USER_STOP_NOTICE: &str = "Restart monitoring stopped by user";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
}

/// Identity of an accepted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub variant: RestartVariant,
    pub started_at: Timestamp,
}

/// Point-in-time view of the coordinator for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionTicket>,
    pub stop_requested: bool,
    pub last_outcome: Option<Outcome>,
    pub last_finished_at: Option<Timestamp>,
}

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDisposition {
    /// A running session was cancelled.
    Cancelled(SessionId),
    /// The running session had already been asked to stop.
    AlreadyStopping(SessionId),
    /// No session was running; observers were told the stream is over.
    Idle,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct ActiveSession {
    ticket: SessionTicket,
    cancel: CancellationToken,
}

struct CoordinatorState {
    active: Option<ActiveSession>,
    /// Parked here between sessions; owned by the worker while one runs.
    follower: Option<Box<dyn LogFollower>>,
    last_outcome: Option<Outcome>,
    last_finished_at: Option<Timestamp>,
}

/// How a session's steps ended, before it is turned into an [`Outcome`].
enum SessionEnd {
    Healthy { status: ServiceStatus, polls: u64 },
    Cancelled,
}

// ---------------------------------------------------------------------------
// RestartCoordinator
// ---------------------------------------------------------------------------

pub struct RestartCoordinator {
    state: Mutex<CoordinatorState>,
    phase: watch::Sender<Phase>,
    bus: Arc<EventBus>,
    probe: Arc<dyn StatusProbe>,
    ticker: Arc<dyn Ticker>,
    commands: RestartCommands,
    timing: SessionTiming,
}

impl RestartCoordinator {
    pub fn new(
        commands: RestartCommands,
        probe: Arc<dyn StatusProbe>,
        follower: Box<dyn LogFollower>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            state: Mutex::new(CoordinatorState {
                active: None,
                follower: Some(follower),
                last_outcome: None,
                last_finished_at: None,
            }),
            phase,
            bus: Arc::new(EventBus::default()),
            probe,
            ticker: Arc::new(TokioTicker),
            commands,
            timing: SessionTiming::default(),
        }
    }

    /// Wire the real status poller and journal tailer from configuration.
    pub fn from_config(config: &RestartConfig) -> Self {
        let probe = StatusPoller::new(
            config.status_spec(),
            config.worker_process_name.clone(),
            config.command_timeout,
        );
        let tailer = JournalTailer::new(
            config.log_follow_spec(),
            config.log_follow_kill_pattern.clone(),
        );
        Self::new(config.commands(), Arc::new(probe), Box::new(tailer))
            .with_timing(config.timing.clone())
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// The bus sessions publish to.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Start a restart session in the background.
    ///
    /// Returns [`CoreError::ConcurrentSessionRejected`] without side effects
    /// if a session is already running.
    pub fn trigger(self: &Arc<Self>, variant: RestartVariant) -> Result<SessionTicket, CoreError> {
        let (ticket, cancel, follower) = {
            let mut state = self.lock();
            if state.active.is_some() {
                return Err(CoreError::ConcurrentSessionRejected);
            }
            let follower = state.follower.take().ok_or_else(|| {
                CoreError::UnclassifiedWorkerFault("log follower was not returned by the previous session".into())
            })?;

            let ticket = SessionTicket {
                session_id: SessionId::new_v4(),
                variant,
                started_at: Utc::now(),
            };
            let cancel = CancellationToken::new();
            state.active = Some(ActiveSession {
                ticket: ticket.clone(),
                cancel: cancel.clone(),
            });
            // Under the state lock so a concurrent stop cannot interleave.
            self.bus.reset();
            (ticket, cancel, follower)
        };
        self.phase.send_replace(Phase::Running);

        let span = tracing::info_span!(
            "restart_session",
            session_id = %ticket.session_id,
            variant = variant.as_str(),
        );
        tracing::info!(
            session_id = %ticket.session_id,
            variant = variant.as_str(),
            command = %self.commands.for_variant(variant),
            "Restart session accepted"
        );

        let coordinator = Arc::clone(self);
        let worker_ticket = ticket.clone();
        tokio::spawn(
            async move { coordinator.run_worker(worker_ticket, cancel, follower).await }
                .instrument(span),
        );

        Ok(ticket)
    }

    /// Ask the running session to stop, or close out observers if idle.
    ///
    /// Observers see a stop notice followed by the terminal event right
    /// away; queued but undelivered progress is discarded. The session
    /// stays active until its worker notices the cancellation and exits.
    pub fn stop(&self) -> StopDisposition {
        let state = self.lock();
        match &state.active {
            Some(active) if active.cancel.is_cancelled() => {
                StopDisposition::AlreadyStopping(active.ticket.session_id)
            }
            Some(active) => {
                active.cancel.cancel();
                self.bus
                    .terminate(LogEvent::progress(USER_STOP_NOTICE), Outcome::StoppedByUser);
                tracing::info!(session_id = %active.ticket.session_id, "Restart session stop requested");
                StopDisposition::Cancelled(active.ticket.session_id)
            }
            None => {
                self.bus.reset();
                self.bus
                    .terminate(LogEvent::progress(USER_STOP_NOTICE), Outcome::StoppedByUser);
                tracing::debug!("Stop requested with no active session");
                StopDisposition::Idle
            }
        }
    }

    /// Stop any running session and wait up to `timeout` for it to exit.
    ///
    /// Returns `true` if the coordinator is idle afterwards.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if !self.is_active() {
            return true;
        }
        self.stop();
        let mut phase = self.phase.subscribe();
        let idle = tokio::time::timeout(timeout, phase.wait_for(|p| *p == Phase::Idle))
            .await
            .is_ok_and(|waited| waited.is_ok());
        if !idle {
            tracing::warn!(timeout_secs = timeout.as_secs(), "Restart session did not exit before shutdown");
        }
        idle
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.lock();
        CoordinatorSnapshot {
            phase: if state.active.is_some() {
                Phase::Running
            } else {
                Phase::Idle
            },
            session: state.active.as_ref().map(|a| a.ticket.clone()),
            stop_requested: state
                .active
                .as_ref()
                .is_some_and(|a| a.cancel.is_cancelled()),
            last_outcome: state.last_outcome.clone(),
            last_finished_at: state.last_finished_at,
        }
    }

    // -- worker -------------------------------------------------------------

    async fn run_worker(
        self: Arc<Self>,
        ticket: SessionTicket,
        cancel: CancellationToken,
        mut follower: Box<dyn LogFollower>,
    ) {
        let result = AssertUnwindSafe(self.run_session(&ticket, &cancel, follower.as_mut()))
            .catch_unwind()
            .await;

        let end = match result {
            Ok(Ok(end)) => Ok(end),
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(CoreError::UnclassifiedWorkerFault(panic_message(panic.as_ref()))),
        };

        follower.stop().await;
        let outcome = self.finalize(end);

        {
            let mut state = self.lock();
            state.active = None;
            state.follower = Some(follower);
            state.last_outcome = Some(outcome.clone());
            state.last_finished_at = Some(Utc::now());
        }
        self.phase.send_replace(Phase::Idle);

        let elapsed = Utc::now() - ticket.started_at;
        tracing::info!(
            %outcome,
            elapsed_secs = elapsed.num_seconds(),
            "Restart session finished"
        );
    }

    /// Publish the closing events for `end` and return the outcome.
    fn finalize(&self, end: Result<SessionEnd, CoreError>) -> Outcome {
        match end {
            Ok(SessionEnd::Healthy { status, polls }) => {
                self.progress(format!(
                    "Container Manager is running again after {polls} status check(s)"
                ));
                if !status.message.is_empty() {
                    self.progress(format!("Status: {}", status.message));
                }
                if self.bus.finish(Outcome::Succeeded) {
                    Outcome::Succeeded
                } else {
                    // A stop sealed the bus first; observers saw that ending.
                    Outcome::StoppedByUser
                }
            }
            Ok(SessionEnd::Cancelled) => {
                // Normally already sealed by `stop`; covers cancellation
                // from any other path.
                self.bus
                    .terminate(LogEvent::progress(USER_STOP_NOTICE), Outcome::StoppedByUser);
                Outcome::StoppedByUser
            }
            Err(e) => {
                tracing::error!(error = %e, "Restart session failed");
                let reason = e.to_string();
                self.progress(format!("Restart failed: {reason}"));
                let failed = Outcome::Failed { reason };
                if self.bus.finish(failed.clone()) {
                    failed
                } else {
                    Outcome::StoppedByUser
                }
            }
        }
    }

    async fn run_session(
        &self,
        ticket: &SessionTicket,
        cancel: &CancellationToken,
        follower: &mut dyn LogFollower,
    ) -> Result<SessionEnd, CoreError> {
        self.progress(format!(
            "Restart requested ({} variant)",
            ticket.variant.as_str()
        ));

        match follower.start().await {
            Ok(()) => self.progress("Following service journal"),
            Err(e) => {
                tracing::warn!(error = %e, "Log follower unavailable");
                self.progress(format!("Warning: journal lines unavailable: {e}"));
            }
        }

        // -- reload ---------------------------------------------------------
        let reload = &self.commands.reload;
        self.progress(format!("Running: {reload}"));
        let output = process::run(reload, self.commands.timeout).await;
        if output.succeeded {
            self.progress("Service definitions reloaded");
        } else {
            let detail = match output.failure_error(reload) {
                Some(e) => e.to_string(),
                None => describe_exit(&output),
            };
            tracing::warn!(command = %reload, detail = %detail, "Reload command failed");
            self.progress(format!("Warning: reload failed, continuing: {detail}"));
        }
        if cancel.is_cancelled() {
            return Ok(SessionEnd::Cancelled);
        }

        // -- restart --------------------------------------------------------
        let restart = self.commands.for_variant(ticket.variant);
        self.progress(format!("Running: {restart}"));
        let mut running = process::spawn(restart)?;
        tracing::debug!(pid = ?running.pid(), command = %restart, "Restart command spawned");

        let mut exited = running.has_exited();
        let mut ticks = 0;
        while !exited && ticks < self.timing.drain_ticks {
            if until_cancelled(cancel, self.ticker.sleep(self.timing.drain_tick))
                .await
                .is_none()
            {
                return Ok(SessionEnd::Cancelled);
            }
            ticks += 1;
            self.drain_journal(follower);
            exited = running.has_exited();
        }

        if exited {
            let Some(output) = until_cancelled(cancel, running.collect()).await else {
                return Ok(SessionEnd::Cancelled);
            };
            if !output.stdout.is_empty() {
                self.bus
                    .publish(LogEvent::new(LogSource::CommandStdout, output.stdout.clone()));
            }
            if !output.stderr.is_empty() {
                self.bus
                    .publish(LogEvent::new(LogSource::CommandStderr, output.stderr.clone()));
            }
            if output.succeeded {
                self.progress("Restart command sent");
            } else {
                self.progress(format!(
                    "Warning: restart command reported failure ({}), checking status anyway",
                    describe_exit(&output)
                ));
            }
        } else {
            let waited = self.timing.drain_tick * self.timing.drain_ticks;
            self.progress(format!(
                "Restart command still running after {}s, checking status anyway",
                waited.as_secs()
            ));
            let label = restart.to_string();
            tokio::spawn(async move {
                let output = running.collect().await;
                tracing::info!(
                    command = %label,
                    exit_code = ?output.exit_code,
                    "Detached restart command exited"
                );
            });
        }

        // -- status polling -------------------------------------------------
        if cancel.is_cancelled() {
            return Ok(SessionEnd::Cancelled);
        }
        self.progress("Waiting for the service to come back...");
        if until_cancelled(cancel, self.ticker.sleep(self.timing.settle_delay))
            .await
            .is_none()
        {
            return Ok(SessionEnd::Cancelled);
        }

        let summary_every = u64::from(self.timing.summary_every.max(1));
        let mut polls: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }
            polls += 1;
            let status = self.probe.poll().await;
            self.drain_journal(follower);

            if status.running {
                return Ok(SessionEnd::Healthy { status, polls });
            }
            if polls % summary_every == 0 {
                self.progress(format!(
                    "Status check #{polls}: {} ({})",
                    status.status_text, status.message
                ));
            }
            if until_cancelled(cancel, self.ticker.sleep(self.timing.status_interval))
                .await
                .is_none()
            {
                return Ok(SessionEnd::Cancelled);
            }
        }
    }

    fn drain_journal(&self, follower: &mut dyn LogFollower) {
        while let Some(line) = follower.read_line_nonblocking() {
            self.bus.publish(LogEvent::journal(line));
        }
    }

    fn progress(&self, text: impl Into<String>) {
        self.bus.publish(LogEvent::progress(text));
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wait on `fut` unless `cancel` fires first. Used for pacing waits and for
/// collecting output of a command that has already exited; commands still
/// running are never interrupted.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn describe_exit(output: &CommandOutput) -> String {
    let code = match output.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };
    if output.stderr.is_empty() {
        code
    } else {
        format!("{code}: {}", output.stderr)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
