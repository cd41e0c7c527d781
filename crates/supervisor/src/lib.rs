//! Restart orchestration for the container manager service.
//!
//! - [`coordinator`]: single-flight restart sessions publishing to an
//!   [`cmctl_events::EventBus`].
//! - [`tailer`]: non-blocking follower for the service journal.
//! - [`poller`]: status command + process-table probe.
//! - [`config`]: environment-driven configuration.

pub mod config;
pub mod coordinator;
pub mod poller;
pub mod tailer;
pub mod ticker;

pub use config::{RestartCommands, RestartConfig, RestartVariant, SessionTiming};
pub use coordinator::{
    CoordinatorSnapshot, Phase, RestartCoordinator, SessionTicket, StopDisposition,
    USER_STOP_NOTICE,
};
pub use poller::{StatusPoller, StatusProbe};
pub use tailer::{JournalTailer, LogFollower};
pub use ticker::{Ticker, TokioTicker};
