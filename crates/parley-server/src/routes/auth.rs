//! Registration, login, logout and account removal.

use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use parley_store::{Role, User};

use crate::auth::{Identity, clear_cookie, session_cookie};
use crate::error::ServerError;
use crate::password::{hash_password, verify_password};
use crate::state::AppState;

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=64;

const INVALID_CREDENTIALS: &str = "invalid username or password";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Username and password.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

/// Confirmation for account deletion.
pub type AccountRequest = CredentialsRequest;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Session token, also set as a cookie.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OkResponse {
    pub ok: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/auth/register - Create an account.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Account created", body = TokenResponse),
        (status = 400, description = "Invalid username or password"),
        (status = 409, description = "Username taken"),
        (status = 429, description = "Too many requests"),
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ServerError> {
    validate_username(&request.username)?;
    validate_password(&request.password)?;

    let hash = hash_password(&request.password, state.config.bcrypt_cost).await?;
    let user = state
        .store
        .create_user(&request.username, &hash, Role::User)?;

    tracing::info!(user_id = %user.id, username = %user.username, "Registered user");

    let token = state.sessions.issue(&user)?;
    state.identities.set(user.username.clone(), user);

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, session_cookie(&state.config, &token))],
        Json(TokenResponse { token }),
    ))
}

/// POST /api/v1/auth/login - Exchange credentials for a session token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Logged in", body = TokenResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many requests"),
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ServerError> {
    if request.username.is_empty() || request.password.is_empty() {
        return Err(ServerError::BadRequest(
            "username and password are required".to_string(),
        ));
    }

    let user = lookup_user(&state, &request.username)?
        .ok_or_else(|| ServerError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    if !verify_password(&request.password, &user.password_hash).await? {
        return Err(ServerError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    let token = state.sessions.issue(&user)?;
    tracing::debug!(user_id = %user.id, "Login succeeded");

    Ok((
        [(SET_COOKIE, session_cookie(&state.config, &token))],
        Json(TokenResponse { token }),
    ))
}

/// POST /api/v1/auth/logout - Drop the session cookie.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = OkResponse),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "auth"
)]
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
) -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_cookie(&state.config))],
        Json(OkResponse { ok: true }),
    )
}

/// DELETE /api/v1/auth/account - Remove the caller's account and history.
#[utoipa::path(
    delete,
    path = "/api/v1/auth/account",
    request_body = AccountRequest,
    responses(
        (status = 200, description = "Account deleted", body = OkResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Credentials belong to another account"),
    ),
    tag = "auth"
)]
pub async fn delete_account_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<AccountRequest>,
) -> Result<impl IntoResponse, ServerError> {
    if request.username != identity.username {
        return Err(ServerError::Forbidden(
            "credentials do not match the signed-in account".to_string(),
        ));
    }

    let user = lookup_user(&state, &request.username)?
        .filter(|u| u.id == identity.user_id)
        .ok_or_else(|| ServerError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    if !verify_password(&request.password, &user.password_hash).await? {
        return Err(ServerError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    state.store.delete_user(&user.id)?;
    state.identities.delete(&user.username);
    tracing::info!(user_id = %user.id, "Deleted account");

    Ok((
        [(SET_COOKIE, clear_cookie(&state.config))],
        Json(OkResponse { ok: true }),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Identity record from the cache, else the store.
fn lookup_user(state: &AppState, username: &str) -> Result<Option<User>, ServerError> {
    if let Some(user) = state.identities.get(username) {
        return Ok(Some(user));
    }

    let user = state.store.find_user_by_username(username)?;
    if let Some(user) = &user {
        state.identities.set(username, user.clone());
    }
    Ok(user)
}

fn validate_username(username: &str) -> Result<(), ServerError> {
    if !USERNAME_LEN.contains(&username.len()) || !username.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ServerError::BadRequest(
            "username must be 3 to 32 letters or digits".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ServerError> {
    if !PASSWORD_LEN.contains(&password.chars().count()) {
        return Err(ServerError::BadRequest(
            "password must be 6 to 64 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::routes::test_support::*;
    use crate::state::{test_state, test_state_with};
    use parley_config::LimitConfig;
    use serde_json::json;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("abc").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("ünïcode").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("123456").is_ok());
        assert!(validate_password("12345").is_err());
        assert!(validate_password(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_register_sets_cookie_and_caches() {
        let (state, _) = test_state();
        let app = app(state.clone());

        let response = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/register",
                Some(json!({ "username": "alice", "password": "secret123" })),
                None,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("auth_token="));
        assert!(cookie.contains("HttpOnly"));

        let body = body_json(response).await;
        assert!(state.sessions.verify(body["token"].as_str().unwrap()).is_ok());
        assert!(state.identities.contains("alice"));
    }

    #[tokio::test]
    async fn test_register_duplicate_conflicts() {
        let (state, _) = test_state();
        let app = app(state);
        register(&app, "alice").await;

        let response = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/register",
                Some(json!({ "username": "alice", "password": "another1" })),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_login_falls_back_to_store() {
        let (state, _) = test_state();
        let app = app(state.clone());
        register(&app, "alice").await;
        state.identities.delete("alice");

        let response = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({ "username": "alice", "password": "secret123" })),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.identities.contains("alice"));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (state, _) = test_state();
        let app = app(state);
        register(&app, "alice").await;

        let wrong_password = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({ "username": "alice", "password": "nope-nope" })),
                None,
            ),
        )
        .await;
        let unknown_user = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({ "username": "mallory", "password": "secret123" })),
                None,
            ),
        )
        .await;

        assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(wrong_password).await, body_json(unknown_user).await);
    }

    #[tokio::test]
    async fn test_login_missing_fields() {
        let (state, _) = test_state();
        let app = app(state);
        let response = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({ "username": "", "password": "" })),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_is_admission_guarded() {
        let config = ServerConfig::default()
            .with_bcrypt_cost(4)
            .with_login_limit(LimitConfig {
                capacity: 2,
                refill_per_second: 0.0,
            });
        let (state, _) = test_state_with(config);
        let app = app(state);

        let attempt = || {
            request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({ "username": "nobody", "password": "whatever" })),
                None,
            )
        };
        assert_eq!(send(&app, attempt()).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(send(&app, attempt()).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(send(&app, attempt()).await.status(), StatusCode::TOO_MANY_REQUESTS);

        let registered = send(
            &app,
            request(
                "POST",
                "/api/v1/auth/register",
                Some(json!({ "username": "alice", "password": "secret123" })),
                None,
            ),
        )
        .await;
        assert_eq!(registered.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_admission_disabled() {
        let config = ServerConfig::default()
            .with_bcrypt_cost(4)
            .with_rate_limiting(false)
            .with_login_limit(LimitConfig {
                capacity: 1,
                refill_per_second: 0.0,
            });
        let (state, _) = test_state_with(config);
        let app = app(state);

        for _ in 0..3 {
            let response = send(
                &app,
                request(
                    "POST",
                    "/api/v1/auth/login",
                    Some(json!({ "username": "nobody", "password": "whatever" })),
                    None,
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_logout_clears_cookie() {
        let (state, _) = test_state();
        let app = app(state);
        let token = register(&app, "alice").await;

        let response = send(&app, request("POST", "/api/v1/auth/logout", None, Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_delete_account() {
        let (state, _) = test_state();
        let app = app(state.clone());
        let token = register(&app, "alice").await;
        create_conversation(&app, &token, "hello there").await;

        let forbidden = send(
            &app,
            request(
                "DELETE",
                "/api/v1/auth/account",
                Some(json!({ "username": "bob", "password": "secret123" })),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let response = send(
            &app,
            request(
                "DELETE",
                "/api/v1/auth/account",
                Some(json!({ "username": "alice", "password": "secret123" })),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.identities.contains("alice"));
        assert!(state.store.find_user_by_username("alice").unwrap().is_none());
    }
}
