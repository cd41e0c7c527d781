//! Service status probing.
//!
//! [`StatusPoller`] runs the configured status command and classifies its
//! output. When the status command itself fails without saying anything
//! useful on stdout, it falls back to looking for the worker process in the
//! process table by exact name.

use std::time::Duration;

use async_trait::async_trait;
use cmctl_core::process::{self, CommandSpec};
use cmctl_core::status::{self, Classification, ServiceStatus};

/// Something that can report whether the managed service is up.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// One status check. Never fails; problems are folded into the
    /// returned status.
    async fn poll(&self) -> ServiceStatus;
}

/// [`StatusProbe`] backed by the host's status command and `pgrep`.
pub struct StatusPoller {
    status_command: CommandSpec,
    worker_name: String,
    timeout: Duration,
}

impl StatusPoller {
    pub fn new(status_command: CommandSpec, worker_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            status_command,
            worker_name: worker_name.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StatusProbe for StatusPoller {
    async fn poll(&self) -> ServiceStatus {
        let output = process::run(&self.status_command, self.timeout).await;
        match status::classify(&output) {
            Classification::Decided(status) => status,
            Classification::NeedsProcessProbe { stderr } => {
                tracing::debug!(
                    command = %self.status_command,
                    stderr = %stderr,
                    "Status command failed, probing process table"
                );
                // `-x` matches the process name only; `-f` would also match
                // our own journal follower, whose argv names the unit.
                let probe = CommandSpec::argv("pgrep", ["-x", self.worker_name.as_str()]);
                let probe_output = process::run(&probe, self.timeout).await;
                status::classify_probe(&probe_output, &self.worker_name, &stderr)
            }
        }
    }
}
