use std::sync::Arc;

use cmctl_supervisor::{RestartCoordinator, StatusProbe};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Owner of the restart session state and its event bus.
    pub coordinator: Arc<RestartCoordinator>,
    /// Used by the status query, independently of any running session.
    pub status_probe: Arc<dyn StatusProbe>,
    /// Cancelled when the server begins shutting down; closes open streams.
    pub shutdown: CancellationToken,
}
