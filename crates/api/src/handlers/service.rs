use axum::extract::State;
use axum::Json;
use cmctl_core::status::ServiceStatus;
use cmctl_supervisor::CoordinatorSnapshot;
use serde::Serialize;

use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    #[serde(flatten)]
    pub status: ServiceStatus,
    /// Restart coordinator state at the time of the query.
    pub restart: CoordinatorSnapshot,
}

/// GET /service/status
///
/// Probes the service on demand. Never starts or affects a restart session.
pub async fn service_status(
    State(state): State<AppState>,
) -> Json<DataResponse<ServiceStatusResponse>> {
    let status = state.status_probe.poll().await;
    tracing::debug!(running = status.running, status_text = %status.status_text, "Service status queried");

    Json(DataResponse {
        data: ServiceStatusResponse {
            status,
            restart: state.coordinator.snapshot(),
        },
    })
}
