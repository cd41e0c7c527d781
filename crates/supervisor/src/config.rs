use std::str::FromStr;
use std::time::Duration;

use cmctl_core::error::CoreError;
use cmctl_core::process::CommandSpec;
use serde::Serialize;

const DEFAULT_RESTART_CMD: &str = "systemctl restart pkg-ContainerManager-dockerd.service";
const DEFAULT_FALLBACK_RESTART_CMD: &str = "synopkg restart ContainerManager";
const DEFAULT_RELOAD_CMD: &str = "systemctl daemon-reload";
const DEFAULT_STATUS_CMD: &str = "/var/packages/ContainerManager/scripts/start-stop-status status";
/// Used when `DOCKER_STATUS_CMD` is set but empty.
const BLANK_STATUS_CMD_FALLBACK: &str = "synopkg status ContainerManager";
const DEFAULT_LOG_FOLLOW_CMD: &str = "journalctl -u pkg-ContainerManager-dockerd.service -f";
const DEFAULT_LOG_FOLLOW_KILL_PATTERN: &str = "journalctl.*pkg-ContainerManager";
const DEFAULT_WORKER_PROCESS_NAME: &str = "dockerd";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SUMMARY_EVERY: u32 = 5;

// ---------------------------------------------------------------------------
// RestartVariant
// ---------------------------------------------------------------------------

/// Which restart command a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartVariant {
    /// Fast path (`systemctl restart`).
    #[default]
    Primary,
    /// Package-manager restart for when the package itself is unhealthy.
    Fallback,
}

impl RestartVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl FromStr for RestartVariant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "fallback" => Ok(Self::Fallback),
            other => Err(CoreError::Validation(format!(
                "unknown restart variant '{other}' (expected 'primary' or 'fallback')"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionTiming
// ---------------------------------------------------------------------------

/// Pacing of a restart session.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Length of one drain-loop tick.
    pub drain_tick: Duration,
    /// Maximum number of drain-loop ticks spent waiting for the restart
    /// command to return.
    pub drain_ticks: u32,
    /// Pause between the drain loop and the first status poll.
    pub settle_delay: Duration,
    /// Pause between status polls.
    pub status_interval: Duration,
    /// Emit a status summary event every this many polls.
    pub summary_every: u32,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            drain_tick: Duration::from_millis(500),
            drain_ticks: 30,
            settle_delay: Duration::from_secs(3),
            status_interval: Duration::from_secs(1),
            summary_every: DEFAULT_SUMMARY_EVERY,
        }
    }
}

// ---------------------------------------------------------------------------
// RestartCommands
// ---------------------------------------------------------------------------

/// The external commands a session drives.
#[derive(Debug, Clone)]
pub struct RestartCommands {
    pub restart: CommandSpec,
    pub fallback: CommandSpec,
    pub reload: CommandSpec,
    /// Timeout for commands run to completion (reload, status probes).
    pub timeout: Duration,
}

impl RestartCommands {
    pub fn for_variant(&self, variant: RestartVariant) -> &CommandSpec {
        match variant {
            RestartVariant::Primary => &self.restart,
            RestartVariant::Fallback => &self.fallback,
        }
    }
}

// ---------------------------------------------------------------------------
// RestartConfig
// ---------------------------------------------------------------------------

/// Restart core configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RestartConfig {
    pub restart_command: String,
    pub fallback_restart_command: String,
    pub reload_command: String,
    pub status_command: String,
    pub log_follow_command: String,
    pub log_follow_kill_pattern: String,
    /// Exact process name (`pgrep -x`), so command lines that merely
    /// mention it, like the journal follower, do not count.
    pub worker_process_name: String,
    pub command_timeout: Duration,
    pub timing: SessionTiming,
}

impl RestartConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                                                    |
    /// |-------------------------------|------------------------------------------------------------|
    /// | `DOCKER_RESTART_CMD`          | `systemctl restart pkg-ContainerManager-dockerd.service`   |
    /// | `DOCKER_RESTART_CMD_FALLBACK` | `synopkg restart ContainerManager`                         |
    /// | `DOCKER_RELOAD_CMD`           | `systemctl daemon-reload`                                  |
    /// | `DOCKER_STATUS_CMD`           | `/var/packages/ContainerManager/scripts/start-stop-status status` |
    /// | `LOG_FOLLOW_CMD`              | `journalctl -u pkg-ContainerManager-dockerd.service -f`    |
    /// | `LOG_FOLLOW_KILL_PATTERN`     | `journalctl.*pkg-ContainerManager`                         |
    /// | `WORKER_PROCESS_NAME`         | `dockerd`                                                  |
    /// | `COMMAND_TIMEOUT_SECS`        | `30`                                                       |
    /// | `STATUS_SUMMARY_EVERY`        | `5`                                                        |
    ///
    /// An empty `DOCKER_STATUS_CMD` selects `synopkg status ContainerManager`.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let status_command = match lookup("DOCKER_STATUS_CMD") {
            None => DEFAULT_STATUS_CMD.to_string(),
            Some(v) if v.trim().is_empty() => BLANK_STATUS_CMD_FALLBACK.to_string(),
            Some(v) => v.trim().to_string(),
        };

        let command_timeout_secs: u64 = parse_or(
            &lookup,
            "COMMAND_TIMEOUT_SECS",
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;
        if command_timeout_secs == 0 {
            return Err(CoreError::Validation(
                "COMMAND_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let summary_every: u32 = parse_or(&lookup, "STATUS_SUMMARY_EVERY", DEFAULT_SUMMARY_EVERY)?;
        if summary_every == 0 {
            return Err(CoreError::Validation(
                "STATUS_SUMMARY_EVERY must be greater than zero".to_string(),
            ));
        }

        let log_follow_command = or_default("LOG_FOLLOW_CMD", DEFAULT_LOG_FOLLOW_CMD);
        if CommandSpec::from_words(&log_follow_command).is_none() {
            return Err(CoreError::Validation(
                "LOG_FOLLOW_CMD must not be blank".to_string(),
            ));
        }

        Ok(Self {
            restart_command: or_default("DOCKER_RESTART_CMD", DEFAULT_RESTART_CMD),
            fallback_restart_command: or_default(
                "DOCKER_RESTART_CMD_FALLBACK",
                DEFAULT_FALLBACK_RESTART_CMD,
            ),
            reload_command: or_default("DOCKER_RELOAD_CMD", DEFAULT_RELOAD_CMD),
            status_command,
            log_follow_command,
            log_follow_kill_pattern: or_default(
                "LOG_FOLLOW_KILL_PATTERN",
                DEFAULT_LOG_FOLLOW_KILL_PATTERN,
            ),
            worker_process_name: or_default("WORKER_PROCESS_NAME", DEFAULT_WORKER_PROCESS_NAME),
            command_timeout: Duration::from_secs(command_timeout_secs),
            timing: SessionTiming {
                summary_every,
                ..SessionTiming::default()
            },
        })
    }

    /// The commands a session runs, as executable specs.
    pub fn commands(&self) -> RestartCommands {
        RestartCommands {
            restart: CommandSpec::shell(&self.restart_command),
            fallback: CommandSpec::shell(&self.fallback_restart_command),
            reload: CommandSpec::shell(&self.reload_command),
            timeout: self.command_timeout,
        }
    }

    /// The status command as an executable spec.
    pub fn status_spec(&self) -> CommandSpec {
        CommandSpec::shell(&self.status_command)
    }

    /// The log follow command, spawned directly so the tracked handle is
    /// the follower itself rather than a wrapping shell.
    pub fn log_follow_spec(&self) -> CommandSpec {
        CommandSpec::from_words(&self.log_follow_command)
            .unwrap_or_else(|| CommandSpec::shell(&self.log_follow_command))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            CoreError::Validation(format!("{key} must be a valid non-negative integer"))
        }),
        _ => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
