//! Session and room endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::session::{SessionInfo, SessionMode, Utterance};
use crate::transport::DisplayAction;

/// Build session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_sessions).post(start_session))
        .route("/{session_id}", delete(end_session))
        .route("/{session_id}/utterances", post(submit_utterance))
        .with_state(state)
}

/// Build room router
pub fn rooms_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/{room_id}/wake", post(wake))
        .route("/{room_id}/display", post(display))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub room_id: String,
    #[serde(default)]
    pub mode: SessionMode,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TextUtterance {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct UtteranceAccepted {
    pub session_id: String,
    pub accepted: bool,
}

async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.list().await)
}

async fn start_session(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let session_id = state
        .manager
        .start_session(&request.room_id, request.mode)
        .await?;
    Ok((StatusCode::CREATED, Json(SessionCreated { session_id })))
}

async fn end_session(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.end_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts JSON `{"text": ...}` or a raw WAV body
async fn submit_utterance(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UtteranceAccepted>), ApiError> {
    let is_audio = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("audio/"));

    let utterance = if is_audio {
        if body.is_empty() {
            return Err(ApiError::BadRequest("empty audio body".to_string()));
        }
        Utterance::Audio(body.to_vec())
    } else {
        let request: TextUtterance = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("expected {{\"text\"}} or audio/wav: {e}")))?;
        Utterance::Text(request.text)
    };

    let handle = state.manager.submit_utterance(&session_id, utterance).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UtteranceAccepted {
            session_id: handle.session_id().to_string(),
            accepted: true,
        }),
    ))
}

async fn wake(
    State(state): State<Arc<ApiState>>,
    Path(room_id): Path<String>,
) -> Result<Json<SessionCreated>, ApiError> {
    let session_id = state.manager.wake(&room_id).await?;
    Ok(Json(SessionCreated { session_id }))
}

async fn display(
    State(state): State<Arc<ApiState>>,
    Path(room_id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let action = DisplayAction::parse(payload)?;
    state.manager.display(&room_id, action).await?;
    Ok(StatusCode::ACCEPTED)
}
