use std::time::Duration;

/// Failure taxonomy shared by every component of the restart core.
///
/// Only [`CoreError::ConcurrentSessionRejected`] ever reaches a trigger
/// caller directly; everything else raised inside a running session is
/// turned into an error event by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Command timed out after {}s: {command}", timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Failed to launch '{command}': {reason}")]
    CommandLaunchFailure { command: String, reason: String },

    #[error("Log tailer supervision failed: {0}")]
    TailerSupervisionFailure(String),

    #[error("A restart session is already running")]
    ConcurrentSessionRejected,

    #[error("Restart worker fault: {0}")]
    UnclassifiedWorkerFault(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
