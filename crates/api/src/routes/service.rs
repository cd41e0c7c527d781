use axum::routing::get;
use axum::Router;

use crate::handlers::service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/service/status", get(service::service_status))
}
