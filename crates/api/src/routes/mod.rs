pub mod health;
pub mod restart;
pub mod service;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /restart                 POST  start a session (?variant=primary|fallback)
/// /restart/fallback        POST  start a session with the fallback command
/// /restart/stream          GET   server-sent progress events
/// /restart/stop            POST  stop the running session
///
/// /service/status          GET   on-demand service status + coordinator state
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(restart::router())
        .merge(service::router())
}
