//! Channel policy endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;

use fc_domain::types::ChannelThrottle;

use crate::api::ApiResult;
use crate::control;
use crate::state::EngineState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_channels(State(state): State<EngineState>) -> ApiResult<Json<serde_json::Value>> {
    let channels = control::list_channels(&state)?;
    Ok(Json(serde_json::json!({ "channels": channels })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/channels/:id/forwarding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ForwardingBody {
    pub enabled: bool,
}

pub async fn set_forwarding(
    State(state): State<EngineState>,
    Path(channel_id): Path<String>,
    Json(body): Json<ForwardingBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let channel = control::set_channel_forwarding(&state, &channel_id, body.enabled)?;
    Ok(Json(serde_json::json!({ "channel": channel })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/channels/:id/throttle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ThrottleBody {
    /// `null` clears the override (back to the configured default).
    pub throttle: Option<ChannelThrottle>,
}

pub async fn set_throttle(
    State(state): State<EngineState>,
    Path(channel_id): Path<String>,
    Json(body): Json<ThrottleBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let channel = control::set_channel_throttle(&state, &channel_id, body.throttle)?;
    Ok(Json(serde_json::json!({ "channel": channel })))
}
