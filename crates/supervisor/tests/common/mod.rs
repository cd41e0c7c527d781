#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use cmctl_core::error::CoreError;
use cmctl_core::process::CommandSpec;
use cmctl_core::status::ServiceStatus;
use cmctl_events::{EventBus, SessionEvent};
use cmctl_supervisor::{
    LogFollower, RestartCommands, RestartCoordinator, SessionTiming, StatusProbe, Ticker,
    TokioTicker,
};

// ---------------------------------------------------------------------------
// Status probe fakes
// ---------------------------------------------------------------------------

/// Returns the scripted statuses in order, then repeats the last one.
pub struct ScriptedStatus {
    script: Vec<ServiceStatus>,
    polls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn new(script: Vec<ServiceStatus>) -> Self {
        assert!(!script.is_empty(), "script needs at least one status");
        Self {
            script,
            polls: AtomicUsize::new(0),
        }
    }

    /// `stopped` stopped polls followed by running forever.
    pub fn running_after(stopped: usize) -> Self {
        let mut script: Vec<ServiceStatus> = (0..stopped)
            .map(|_| ServiceStatus::stopped("ContainerManager   stopped"))
            .collect();
        script.push(ServiceStatus::running("ContainerManager   running"));
        Self::new(script)
    }

    pub fn never_running() -> Self {
        Self::new(vec![ServiceStatus::stopped("ContainerManager   stopped")])
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProbe for ScriptedStatus {
    async fn poll(&self) -> ServiceStatus {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        self.script[n.min(self.script.len() - 1)].clone()
    }
}

/// Panics on the first poll.
pub struct PanickingStatus;

#[async_trait]
impl StatusProbe for PanickingStatus {
    async fn poll(&self) -> ServiceStatus {
        panic!("status probe exploded");
    }
}

/// Asks the coordinator to stop from inside the poll, then reports the
/// service as running.
#[derive(Default)]
pub struct StopsDuringPoll {
    coordinator: OnceLock<Weak<RestartCoordinator>>,
}

impl StopsDuringPoll {
    pub fn attach(&self, coordinator: &Arc<RestartCoordinator>) {
        let _ = self.coordinator.set(Arc::downgrade(coordinator));
    }
}

#[async_trait]
impl StatusProbe for StopsDuringPoll {
    async fn poll(&self) -> ServiceStatus {
        if let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) {
            coordinator.stop();
        }
        ServiceStatus::running("ContainerManager   running")
    }
}

// ---------------------------------------------------------------------------
// Log follower fake
// ---------------------------------------------------------------------------

/// Shared record of what the coordinator did with a [`ScriptedFollower`].
#[derive(Default)]
pub struct FollowerLog {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
    lines: Mutex<VecDeque<String>>,
}

impl FollowerLog {
    pub fn push_line(&self, line: &str) {
        self.lines.lock().unwrap().push_back(line.to_string());
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

pub struct ScriptedFollower {
    log: Arc<FollowerLog>,
    running: bool,
}

impl ScriptedFollower {
    pub fn new(log: Arc<FollowerLog>) -> Self {
        Self {
            log,
            running: false,
        }
    }
}

#[async_trait]
impl LogFollower for ScriptedFollower {
    async fn start(&mut self) -> Result<(), CoreError> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        if self.log.fail_start.load(Ordering::SeqCst) {
            return Err(CoreError::TailerSupervisionFailure(
                "journalctl not available".to_string(),
            ));
        }
        self.running = true;
        Ok(())
    }

    fn read_line_nonblocking(&mut self) -> Option<String> {
        if !self.running {
            return None;
        }
        self.log.lines.lock().unwrap().pop_front()
    }

    async fn stop(&mut self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

// ---------------------------------------------------------------------------
// Ticker fake
// ---------------------------------------------------------------------------

/// Ticker that only yields to the scheduler.
pub struct InstantTicker;

#[async_trait]
impl Ticker for InstantTicker {
    async fn sleep(&self, _period: Duration) {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Commands that succeed quickly on any unix host.
pub fn quick_commands() -> RestartCommands {
    RestartCommands {
        restart: CommandSpec::shell("echo restarting primary"),
        fallback: CommandSpec::shell("echo restarting fallback"),
        reload: CommandSpec::shell("true"),
        timeout: Duration::from_secs(10),
    }
}

pub fn test_timing() -> SessionTiming {
    SessionTiming {
        drain_tick: Duration::from_millis(10),
        drain_ticks: 50,
        settle_delay: Duration::ZERO,
        status_interval: Duration::ZERO,
        summary_every: 5,
    }
}

/// Real sleeps, short enough that the drain loop waits on actual commands.
pub fn paced_timing() -> SessionTiming {
    SessionTiming {
        drain_tick: Duration::from_millis(20),
        drain_ticks: 250,
        ..test_timing()
    }
}

pub fn build_coordinator(
    commands: RestartCommands,
    probe: Arc<dyn StatusProbe>,
    follower: Arc<FollowerLog>,
) -> Arc<RestartCoordinator> {
    build_coordinator_with(commands, probe, follower, Arc::new(InstantTicker), test_timing())
}

pub fn build_paced_coordinator(
    commands: RestartCommands,
    probe: Arc<dyn StatusProbe>,
    follower: Arc<FollowerLog>,
) -> Arc<RestartCoordinator> {
    build_coordinator_with(commands, probe, follower, Arc::new(TokioTicker), paced_timing())
}

pub fn build_coordinator_with(
    commands: RestartCommands,
    probe: Arc<dyn StatusProbe>,
    follower: Arc<FollowerLog>,
    ticker: Arc<dyn Ticker>,
    timing: SessionTiming,
) -> Arc<RestartCoordinator> {
    Arc::new(
        RestartCoordinator::new(commands, probe, Box::new(ScriptedFollower::new(follower)))
            .with_ticker(ticker)
            .with_timing(timing),
    )
}

// ---------------------------------------------------------------------------
// Assertions helpers
// ---------------------------------------------------------------------------

/// Consume events until the terminal one. Panics if none arrives in time.
pub async fn drain_session(bus: &EventBus) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match bus.consume_blocking(Duration::from_secs(10)).await {
            Some(event) => {
                let done = matches!(event, SessionEvent::Terminal(_));
                events.push(event);
                if done {
                    return events;
                }
            }
            None => panic!("no terminal event within 10s, got {events:?}"),
        }
    }
}

/// Consume events until one with exactly `text` arrives; returns everything
/// consumed so far.
pub async fn drain_until_text(bus: &EventBus, text: &str) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match bus.consume_blocking(Duration::from_secs(10)).await {
            Some(event) => {
                let hit = matches!(&event, SessionEvent::Progress(ev) if ev.text == text);
                let terminal = matches!(event, SessionEvent::Terminal(_));
                events.push(event);
                if hit {
                    return events;
                }
                assert!(!terminal, "session ended before {text:?}: {events:?}");
            }
            None => panic!("no {text:?} within 10s, got {events:?}"),
        }
    }
}

/// Progress texts in order.
pub fn texts(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Progress(ev) => Some(ev.text.clone()),
            SessionEvent::Terminal(_) => None,
        })
        .collect()
}

pub async fn wait_until_idle(coordinator: &RestartCoordinator) {
    for _ in 0..1000 {
        if !coordinator.is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("coordinator still active after 5s");
}

pub async fn wait_for_polls(probe: &ScriptedStatus, at_least: usize) {
    for _ in 0..1000 {
        if probe.polls() >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("probe polled {} times, wanted {at_least}", probe.polls());
}
