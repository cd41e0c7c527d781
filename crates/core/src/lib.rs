//! Shared building blocks for the Container Manager restart core.
//!
//! - [`error`]: the failure taxonomy used across crates.
//! - [`process`]: external command execution with timeouts.
//! - [`status`]: service status snapshot and its classification rules.
//! - [`log_event`]: progress records and session outcomes.

pub mod error;
pub mod log_event;
pub mod process;
pub mod status;
pub mod types;
