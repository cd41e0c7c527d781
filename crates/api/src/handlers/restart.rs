//! Handlers for restart sessions: trigger, live progress stream, stop.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use cmctl_core::error::CoreError;
use cmctl_core::types::SessionId;
use cmctl_events::{StreamFrame, TERMINAL_MARKER};
use cmctl_supervisor::{RestartVariant, StopDisposition};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RestartQuery {
    /// `primary` (default) or `fallback`.
    pub variant: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<RestartVariant>,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

type TriggerReply = (StatusCode, Json<DataResponse<TriggerResponse>>);

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /restart?variant=primary|fallback
///
/// Starts a restart session in the background. 202 when accepted, 409 when
/// a session is already running.
pub async fn trigger_restart(
    State(state): State<AppState>,
    Query(query): Query<RestartQuery>,
) -> AppResult<TriggerReply> {
    let variant = match query.variant.as_deref().map(str::trim) {
        None | Some("") => RestartVariant::Primary,
        Some(raw) => raw
            .parse::<RestartVariant>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
    };
    start_session(&state, variant)
}

/// POST /restart/fallback
pub async fn trigger_fallback_restart(State(state): State<AppState>) -> AppResult<TriggerReply> {
    start_session(&state, RestartVariant::Fallback)
}

fn start_session(state: &AppState, variant: RestartVariant) -> AppResult<TriggerReply> {
    match state.coordinator.trigger(variant) {
        Ok(ticket) => Ok((
            StatusCode::ACCEPTED,
            Json(DataResponse {
                data: TriggerResponse {
                    accepted: true,
                    message: "Restart started; follow progress on /api/v1/restart/stream"
                        .to_string(),
                    session_id: Some(ticket.session_id),
                    variant: Some(ticket.variant),
                },
            }),
        )),
        Err(CoreError::ConcurrentSessionRejected) => {
            tracing::info!(variant = variant.as_str(), "Restart rejected, session already running");
            Ok((
                StatusCode::CONFLICT,
                Json(DataResponse {
                    data: TriggerResponse {
                        accepted: false,
                        message: "A restart is already in progress".to_string(),
                        session_id: None,
                        variant: None,
                    },
                }),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /restart/stream
///
/// Server-sent events: one `data:` line per progress event, a `heartbeat`
/// comment whenever nothing happened for a poll interval, and a final
/// `data: [DONE]`.
pub async fn stream_restart(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let poll = Duration::from_millis(state.config.stream_poll_millis);
    tracing::debug!(poll_ms = state.config.stream_poll_millis, "Observer attached to restart stream");

    let stream = cmctl_events::frames(state.coordinator.bus(), poll)
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|frame| Ok(to_sse_event(frame)));

    Sse::new(stream)
}

/// POST /restart/stop
///
/// Always succeeds. Observers immediately receive the stop notice and the
/// end of the stream.
pub async fn stop_restart(State(state): State<AppState>) -> Json<DataResponse<StopResponse>> {
    let message = match state.coordinator.stop() {
        StopDisposition::Cancelled(id) => format!("Stopped monitoring restart session {id}"),
        StopDisposition::AlreadyStopping(id) => {
            format!("Restart session {id} is already stopping")
        }
        StopDisposition::Idle => "No restart in progress".to_string(),
    };

    Json(DataResponse {
        data: StopResponse {
            success: true,
            message,
        },
    })
}

fn to_sse_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::KeepAlive => Event::default().comment("heartbeat"),
        // SSE has no escape for bare carriage returns.
        StreamFrame::Message(line) => Event::default().data(line.replace('\r', "")),
        StreamFrame::Done => Event::default().data(TERMINAL_MARKER),
    }
}
