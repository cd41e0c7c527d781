//! Progress records produced during a restart session.

use std::fmt;

use chrono::{Local, Utc};
use serde::Serialize;

use crate::types::Timestamp;

/// Where a [`LogEvent`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Progress, warnings and errors written by the restart coordinator.
    Coordinator,
    /// A line read from the tailed service journal.
    Journal,
    /// Captured stdout of the restart command.
    CommandStdout,
    /// Captured stderr of the restart command.
    CommandStderr,
}

impl LogSource {
    fn tag(self) -> &'static str {
        match self {
            Self::Coordinator => "restart",
            Self::Journal => "journal",
            Self::CommandStdout => "stdout",
            Self::CommandStderr => "stderr",
        }
    }
}

/// One immutable line of session progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub timestamp: Timestamp,
    pub source: LogSource,
    pub text: String,
}

impl LogEvent {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            text: text.into(),
        }
    }

    pub fn progress(text: impl Into<String>) -> Self {
        Self::new(LogSource::Coordinator, text)
    }

    pub fn journal(line: impl Into<String>) -> Self {
        Self::new(LogSource::Journal, line)
    }
}

/// Renders as `[HH:MM:SS] [tag] text` in local time.
impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            self.source.tag(),
            self.text
        )
    }
}

/// How a restart session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { reason: String },
    StoppedByUser,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::StoppedByUser => f.write_str("stopped by user"),
        }
    }
}
