//! Session tokens and the authentication middleware.
//!
//! A successful login or registration issues an HS256 session token. Clients
//! present it either as the session cookie or in the `Authorization` header;
//! the cookie wins when both are sent.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{AUTHORIZATION, COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use parley_store::{Role, User};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated caller, injected into request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Error
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Neither cookie nor header carried a token.
    MissingToken,
    /// Token signature or claims did not validate.
    InvalidToken,
    /// Token is past its expiry.
    Expired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing session token"),
            AuthError::InvalidToken => write!(f, "Invalid session token"),
            AuthError::Expired => write!(f, "Session expired"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServerError::Unauthorized(self.to_string()).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Signs and verifies session tokens.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Keys from a secret generated for this process only.
    ///
    /// Tokens issued with these keys do not survive a restart.
    pub fn random(ttl: Duration) -> Self {
        let secret = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        Self::new(&secret, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for a user.
    pub fn issue(&self, user: &User) -> Result<String, ServerError> {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            iat: now,
            nbf: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServerError::Internal(format!("Failed to sign session token: {}", e)))
    }

    /// Validate a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;

        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookies
// ─────────────────────────────────────────────────────────────────────────────

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(config: &ServerConfig, token: &str) -> HeaderValue {
    let mut cookie = format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        config.cookie_name,
        token,
        config.token_ttl.as_secs()
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    to_header(cookie)
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_cookie(config: &ServerConfig) -> HeaderValue {
    let mut cookie = format!(
        "{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax",
        config.cookie_name
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    to_header(cookie)
}

fn to_header(cookie: String) -> HeaderValue {
    // Tokens and configured names are plain ASCII; anything else yields an
    // empty cookie rather than a panic.
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Find a cookie by name across all `Cookie` headers.
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

/// Session token from the cookie, else from `Authorization`.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = read_cookie(headers, cookie_name) {
        return Some(token);
    }

    let header = headers.get(AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = match header.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        _ => header,
    }
    .trim();
    (!token.is_empty()).then(|| token.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication middleware function.
///
/// Validates the session token and injects the [`Identity`] into request
/// extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token =
        extract_token(request.headers(), &state.config.cookie_name).ok_or(AuthError::MissingToken)?;
    let claims = state.sessions.verify(&token)?;

    request.extensions_mut().insert(Identity {
        user_id: claims.sub,
        username: claims.username,
        role: claims.role,
    });

    Ok(next.run(request).await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::{
        Router,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use chrono::Utc;
    use tower::ServiceExt;

    fn user() -> User {
        User {
            id: "u-1".to_string(),
            username: "alice".to_string(),
            password_hash: String::new(),
            role: Role::Admin,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn protected_handler(axum::Extension(identity): axum::Extension<Identity>) -> String {
        format!("{}:{}", identity.username, identity.role)
    }

    fn create_test_router(state: AppState) -> Router {
        Router::new()
            .route("/protected", get(protected_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = SessionKeys::new("secret", Duration::from_secs(3600));
        let token = keys.issue(&user()).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_issue_with_unbounded_ttl_saturates() {
        let keys = SessionKeys::new("secret", Duration::MAX);
        let token = keys.issue(&user()).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.exp, i64::MAX);
    }

    #[test]
    fn test_verify_wrong_secret() {
        let token = SessionKeys::new("one", Duration::from_secs(60)).issue(&user()).unwrap();
        let err = SessionKeys::new("two", Duration::from_secs(60))
            .verify(&token)
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken);
    }

    #[test]
    fn test_verify_expired() {
        let keys = SessionKeys::new("secret", Duration::from_secs(60));
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "u-1".into(),
            username: "alice".into(),
            role: Role::User,
            iat: now - 7200,
            nbf: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(keys.verify(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn test_extract_token_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; auth_token=from-cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&headers, "auth_token").as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_extract_token_header_forms() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_token(&headers, "auth_token").as_deref(), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("raw-token"));
        assert_eq!(extract_token(&headers, "auth_token").as_deref(), Some("raw-token"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token(&headers, "auth_token"), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(extract_token(&headers, "auth_token"), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   spaced  "));
        assert_eq!(extract_token(&headers, "auth_token").as_deref(), Some("spaced"));
    }

    #[test]
    fn test_cookie_attributes() {
        let config = ServerConfig {
            secure_cookie: true,
            ..ServerConfig::default()
        };
        let set = session_cookie(&config, "tok");
        let set = set.to_str().unwrap();
        assert!(set.starts_with("auth_token=tok;"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("Secure"));

        let cleared = clear_cookie(&config);
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_auth_with_valid_token() {
        let (state, _) = test_state();
        let token = state.sessions.issue(&user()).unwrap();
        let app = create_test_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"alice:admin");
    }

    #[tokio::test]
    async fn test_auth_missing_token() {
        let (state, _) = test_state();
        let app = create_test_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_with_invalid_token() {
        let (state, _) = test_state();
        let app = create_test_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Cookie", "auth_token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
