//! REST endpoints for the session controller

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::capabilities::TranscriptPipeline;
use crate::error::SessionError;
use crate::session::{LookupError, SessionController, SubmitError};

/// Shared state for API handlers
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub pipeline: Arc<TranscriptPipeline>,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub identity: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<String>,
}

fn error(status: StatusCode, error: &'static str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            message,
            existing: None,
        }),
    )
        .into_response()
}

fn lookup_error(e: LookupError) -> Response {
    match e {
        LookupError::NotFound(id) => {
            error(StatusCode::NOT_FOUND, "not_found", format!("no session {}", id))
        }
        e @ LookupError::NotReady { .. } => error(StatusCode::CONFLICT, "not_ready", e.to_string()),
    }
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(submit_session).get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/stop", post(stop_session))
        .route("/sessions/:id/result", get(get_result))
}

/// POST /sessions - start a session; transcription runs once it is done
async fn submit_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    match state.controller.submit(&request.identity, &request.url) {
        Ok(session_id) => {
            let controller = state.controller.clone();
            let pipeline = state.pipeline.clone();
            let id = session_id.clone();
            tokio::spawn(async move {
                if let Err(e) = pipeline.process_session(&controller, &id).await {
                    warn!("Post-processing of {} failed: {}", id, e);
                }
            });
            (StatusCode::CREATED, Json(SubmitResponse { session_id })).into_response()
        }
        Err(SubmitError::RejectedDuplicate { identity, existing }) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "duplicate",
                message: format!("{} already has an active session", identity),
                existing: Some(existing),
            }),
        )
            .into_response(),
        Err(SubmitError::UnknownPlatform { url }) => error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_platform",
            SessionError::ClassificationUnknown { url }.user_message(),
        ),
    }
}

/// GET /sessions
async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.sessions())
}

/// GET /sessions/:id - state snapshot
async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.controller.status(&id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => lookup_error(LookupError::NotFound(id)),
    }
}

/// POST /sessions/:id/stop
async fn stop_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.controller.stop(&id) {
        Ok(ack) => (StatusCode::ACCEPTED, Json(ack)).into_response(),
        Err(e) => lookup_error(e),
    }
}

/// GET /sessions/:id/result - recording and transcript once done
async fn get_result(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.controller.result(&id) {
        Ok(result) => Json(result).into_response(),
        Err(e) => lookup_error(e),
    }
}
