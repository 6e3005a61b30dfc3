//! Statistics endpoint.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;

use fc_ledger::StatsFilter;

use crate::api::ApiResult;
use crate::control;
use crate::state::EngineState;

#[derive(Debug, Deserialize, Default)]
pub struct StatsQuery {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/statistics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_statistics(
    State(state): State<EngineState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<control::Statistics>> {
    let filter = StatsFilter {
        session_phone: query.session,
        source_channel_id: query.channel,
    };
    Ok(Json(control::get_statistics(&state, &filter)?))
}
