//! Service status snapshot and the rules that derive it from command output.
//!
//! Classification is split in two so it stays pure and testable:
//! [`classify`] inspects the status command's output and either decides or
//! asks for a process-table probe; [`classify_probe`] turns the probe's
//! output into the final answer. Every result carries a message naming the
//! signal it was derived from.

use std::fmt;

use serde::Serialize;

use crate::process::{CommandFailure, CommandOutput};

/// Token searched for (case-insensitively) in status command output.
const RUNNING_TOKEN: &str = "running";

/// Normalized service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusText {
    Running,
    Stopped,
    Unknown,
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        })
    }
}

/// Point-in-time status of the managed service.
///
/// Recomputed on every poll; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub status_text: StatusText,
    pub message: String,
}

impl ServiceStatus {
    pub fn running(message: impl Into<String>) -> Self {
        Self {
            running: true,
            status_text: StatusText::Running,
            message: message.into(),
        }
    }

    pub fn stopped(message: impl Into<String>) -> Self {
        Self {
            running: false,
            status_text: StatusText::Stopped,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            running: false,
            status_text: StatusText::Unknown,
            message: message.into(),
        }
    }
}

/// Outcome of looking at the status command alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Decided(ServiceStatus),
    /// The status command failed with error text only; consult the process
    /// table before answering.
    NeedsProcessProbe { stderr: String },
}

/// Classify the status command's output.
///
/// 1. exit 0 and stdout mentions `running` → Running
/// 2. stdout present without `running` → Stopped (stdout as message)
/// 3. no stdout but stderr present → process-table probe
/// 4. nothing at all → Stopped with a generic message
pub fn classify(output: &CommandOutput) -> Classification {
    if output.succeeded && mentions_running(&output.stdout) {
        return Classification::Decided(ServiceStatus::running(non_empty_or(
            &output.stdout,
            "Service is running",
        )));
    }

    if !output.stdout.is_empty() && !mentions_running(&output.stdout) {
        return Classification::Decided(ServiceStatus::stopped(output.stdout.clone()));
    }

    if !output.stderr.is_empty() {
        return Classification::NeedsProcessProbe {
            stderr: output.stderr.clone(),
        };
    }

    Classification::Decided(ServiceStatus::stopped(
        "Service is stopped (status command exited non-zero)",
    ))
}

/// Classify the process-table probe run after a failed status command.
///
/// `worker` is the worker process name that was searched for and
/// `status_stderr` the error text of the original status command.
pub fn classify_probe(probe: &CommandOutput, worker: &str, status_stderr: &str) -> ServiceStatus {
    if probe.failure == Some(CommandFailure::Launch) {
        return ServiceStatus::unknown(format!(
            "Status command failed ({status_stderr}) and the process table could not be checked: {}",
            probe.stderr
        ));
    }

    if probe.succeeded && !probe.stdout.is_empty() {
        return ServiceStatus::running(format!(
            "Status command failed; found running '{worker}' process in the process table"
        ));
    }

    ServiceStatus::stopped(non_empty_or(
        status_stderr,
        "Unable to determine service status",
    ))
}

fn mentions_running(text: &str) -> bool {
    text.to_lowercase().contains(RUNNING_TOKEN)
}

fn non_empty_or(text: &str, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
