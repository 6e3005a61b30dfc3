//! Session management endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;

use crate::api::{ApiError, ApiResult};
use crate::control::{self, AddSessionRequest};
use crate::state::EngineState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<EngineState>) -> ApiResult<Json<serde_json::Value>> {
    let sessions = control::list_sessions(&state)?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn add_session(
    State(state): State<EngineState>,
    Json(body): Json<AddSessionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = control::add_session(&state, body).await?;
    Ok(Json(serde_json::json!({ "session": session })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:phone/pause
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
pub struct PauseBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn pause_session(
    State(state): State<EngineState>,
    Path(phone): Path<String>,
    body: Option<Json<PauseBody>>,
) -> ApiResult<Json<serde_json::Value>> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "paused by operator".into());
    let session = control::pause_session(&state, &phone, &reason)?;
    Ok(Json(serde_json::json!({ "session": session })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:phone/resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn resume_session(
    State(state): State<EngineState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = control::resume_session(&state, &phone).await?;
    Ok(Json(serde_json::json!({ "session": session })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:phone
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn remove_session(
    State(state): State<EngineState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = control::remove_session(&state, &phone)?;
    if !removed {
        return Err(ApiError(fc_domain::Error::session(
            phone,
            "unknown session",
        )));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}
