//! Caller profile and long-term memory endpoints.

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use parley_store::MemoryRecord;

use crate::auth::Identity;
use crate::error::ServerError;
use crate::state::AppState;

/// The one memory document each user has.
const MEMORY_KEY: &str = "profile";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: String,
    pub username: String,
    pub role: String,
    /// Server time.
    pub date: DateTime<Utc>,
    /// English weekday name of `date`.
    pub weekday: String,
}

/// GET /api/v1/profile - Who the caller is, and the server's clock.
#[utoipa::path(
    get,
    path = "/api/v1/profile",
    responses(
        (status = 200, description = "Caller profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "profile"
)]
pub async fn profile_handler(Extension(identity): Extension<Identity>) -> Json<ProfileResponse> {
    let now = Utc::now();
    Json(ProfileResponse {
        user_id: identity.user_id,
        username: identity.username,
        role: identity.role.to_string(),
        date: now,
        weekday: now.format("%A").to_string(),
    })
}

/// Body of a memory update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetMemoryRequest {
    /// Any JSON value; replaces the stored one.
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemoryResponse {
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl From<MemoryRecord> for MemoryResponse {
    fn from(record: MemoryRecord) -> Self {
        Self {
            value: record.value,
            updated_at: record.updated_at,
        }
    }
}

/// GET /api/v1/profile/store - The caller's long-term memory.
#[utoipa::path(
    get,
    path = "/api/v1/profile/store",
    responses(
        (status = 200, description = "Stored memory", body = MemoryResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Nothing stored yet"),
    ),
    tag = "profile"
)]
pub async fn get_memory_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MemoryResponse>, ServerError> {
    let record = state
        .store
        .get_memory(&identity.user_id, MEMORY_KEY)?
        .ok_or_else(|| ServerError::NotFound("long-term memory".to_string()))?;
    Ok(Json(record.into()))
}

/// POST /api/v1/profile/store - Replace the caller's long-term memory.
#[utoipa::path(
    post,
    path = "/api/v1/profile/store",
    request_body = SetMemoryRequest,
    responses(
        (status = 200, description = "Memory saved", body = MemoryResponse),
        (status = 400, description = "Body is not a JSON object with a value"),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "profile"
)]
pub async fn set_memory_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<SetMemoryRequest>, JsonRejection>,
) -> Result<Json<MemoryResponse>, ServerError> {
    let Json(request) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let record = state
        .store
        .put_memory(&identity.user_id, MEMORY_KEY, &request.value)?;

    tracing::debug!(user_id = %identity.user_id, "Saved long-term memory");
    Ok(Json(record.into()))
}

/// DELETE /api/v1/profile/store - Forget the caller's long-term memory.
#[utoipa::path(
    delete,
    path = "/api/v1/profile/store",
    responses(
        (status = 204, description = "Memory removed, or there was none"),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "profile"
)]
pub async fn delete_memory_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, ServerError> {
    let removed = state.store.delete_memory(&identity.user_id, MEMORY_KEY)?;
    tracing::debug!(user_id = %identity.user_id, removed, "Deleted long-term memory");
    Ok(StatusCode::NO_CONTENT)
}
