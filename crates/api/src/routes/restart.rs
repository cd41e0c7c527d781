use axum::routing::{get, post};
use axum::Router;

use crate::handlers::restart;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/restart", post(restart::trigger_restart))
        .route("/restart/fallback", post(restart::trigger_fallback_restart))
        .route("/restart/stream", get(restart::stream_restart))
        .route("/restart/stop", post(restart::stop_restart))
}
