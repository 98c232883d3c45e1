//! Health check endpoints.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ServerError;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Backend health.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpstreamHealthResponse {
    pub status: String,
    /// Provider display name.
    pub provider: String,
    /// Backend version.
    pub version: String,
    pub start_time: String,
    pub run_time: String,
}

/// Simple health check (no auth required).
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Check that the generation backend answers.
#[utoipa::path(
    get,
    path = "/health/upstream",
    responses(
        (status = 200, description = "Backend is reachable", body = UpstreamHealthResponse),
        (status = 502, description = "Backend unreachable", body = crate::error::ErrorResponse),
    ),
    tag = "health"
)]
pub async fn upstream_health(
    State(state): State<AppState>,
) -> Result<Json<UpstreamHealthResponse>, ServerError> {
    let info = state.provider.info().await?;
    Ok(Json(UpstreamHealthResponse {
        status: "ok".to_string(),
        provider: state.provider.name().to_string(),
        version: info.version,
        start_time: info.start_time,
        run_time: info.run_time,
    }))
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/upstream", get(upstream_health))
}
