//! Admin HTTP API.
//!
//! Routes are split into **public** (health probe) and **protected**
//! (session, channel and statistics operations), gated behind the bearer
//! token named by `server.api_token_env`.

pub mod auth;
pub mod channels;
pub mod sessions;
pub mod stats;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;

use fc_domain::Error;

use crate::state::EngineState;

/// Build the full API router. `state` is needed to wire the auth middleware
/// at build time.
pub fn router(state: EngineState) -> Router<EngineState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        // Sessions
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions", post(sessions::add_session))
        .route("/v1/sessions/:phone/pause", post(sessions::pause_session))
        .route("/v1/sessions/:phone/resume", post(sessions::resume_session))
        .route("/v1/sessions/:phone", delete(sessions::remove_session))
        // Channels
        .route("/v1/channels", get(channels::list_channels))
        .route("/v1/channels/:id/forwarding", put(channels::set_forwarding))
        .route("/v1/channels/:id/throttle", put(channels::set_throttle))
        // Statistics
        .route("/v1/statistics", get(stats::get_statistics))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// Liveness probe (public, no auth).
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Error wrapper translating domain errors into HTTP responses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Session { .. } | Error::Channel { .. } => StatusCode::NOT_FOUND,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
