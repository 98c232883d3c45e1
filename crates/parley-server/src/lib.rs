//! HTTP API and streaming relay for the Parley chat gateway.
//!
//! This crate is the network edge between chat clients and the generation
//! backend. It owns accounts and sessions, keeps conversation history in the
//! store, and relays replies either whole or as Server-Sent Events.
//!
//! # Features
//!
//! - REST API for accounts, conversations and messages
//! - SSE streaming with per-chunk flushing and one atomic write per reply
//! - Session tokens in an HttpOnly cookie or `Authorization` header
//! - Token-bucket admission control on login and registration
//! - Request logging
//!
//! # Example
//!
//! ```ignore
//! use parley_server::{AppState, Server, ServerConfig};
//!
//! let config = ServerConfig::new().with_bind_address("127.0.0.1:8080".parse()?);
//! let state = AppState::new(config, store, provider);
//!
//! Server::from_state(state).run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod password;
pub mod ratelimit;
pub mod relay;
pub mod routes;
pub mod state;

pub use auth::{AuthError, Identity, SessionClaims, SessionKeys, auth_middleware};
pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use ratelimit::{AdmissionLimiter, admission_middleware, request_logging_middleware};
pub use relay::{
    ActiveRelays, RelayEvent, RelayFailure, RelayOutcome, RelayState, ReplySink, StreamRelay,
    StreamSession,
};
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

/// The Parley HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        let mut router = Router::new()
            // Health routes (no auth required)
            .merge(routes::health_routes())
            .route("/api/openapi.json", get(routes::openapi_handler))
            .nest("/api/v1", self.api_routes())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                ratelimit::request_logging_middleware,
            ))
            .layer(RequestBodyLimitLayer::new(self.state.config.max_body_size));

        if let Some(cors) = self.cors_layer() {
            router = router.layer(cors);
        }

        router
            // TraceLayer for detailed HTTP tracing
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes (v1).
    ///
    /// Registration and login are public; everything else goes through the
    /// auth middleware.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{delete, get, patch, post};

        let mut register = Router::new().route("/auth/register", post(routes::register_handler));
        let mut login = Router::new().route("/auth/login", post(routes::login_handler));

        if self.state.config.rate_limiting {
            register = register.route_layer(middleware::from_fn_with_state(
                self.state.register_limiter.clone(),
                ratelimit::admission_middleware,
            ));
            login = login.route_layer(middleware::from_fn_with_state(
                self.state.login_limiter.clone(),
                ratelimit::admission_middleware,
            ));
        }

        let protected = Router::new()
            .route("/auth/logout", post(routes::logout_handler))
            .route("/auth/account", delete(routes::delete_account_handler))
            .route("/profile", get(routes::profile_handler))
            .route(
                "/profile/store",
                get(routes::get_memory_handler)
                    .post(routes::set_memory_handler)
                    .delete(routes::delete_memory_handler),
            )
            .route(
                "/conversations",
                post(routes::create_conversation_handler).get(routes::list_conversations_handler),
            )
            .route(
                "/conversations/{id}",
                patch(routes::update_conversation_handler)
                    .delete(routes::delete_conversation_handler),
            )
            .route(
                "/conversations/{id}/messages",
                get(routes::list_messages_handler).post(routes::send_message_handler),
            )
            .route("/conversations/{id}/cancel", post(routes::cancel_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ));

        Router::new().merge(register).merge(login).merge(protected)
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origins: Vec<HeaderValue> = self
            .state
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        if origins.is_empty() {
            return None;
        }

        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                .allow_credentials(true),
        )
    }

    /// Run the server until the process is stopped.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr, std::future::pending()).await
    }

    /// Run on a specific address until `shutdown` resolves.
    pub async fn run_on(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// In-flight requests are drained before returning. Running relays are
    /// cancelled when `shutdown` resolves so open streams end promptly.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.router();
        let relays = Arc::clone(&self.state.relays);
        let shutdown = async move {
            shutdown.await;
            let cancelled = relays.cancel_all();
            if cancelled > 0 {
                info!(cancelled, "Cancelling running relays for shutdown");
            }
        };

        if let Ok(addr) = listener.local_addr() {
            info!("Starting server on {}", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{request, send};
    use crate::state::test_state_with;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_server_health_endpoint() {
        let (state, _) = test_state_with(ServerConfig::new());
        let app = Server::from_state(state).router();

        let response = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let config = ServerConfig {
            max_body_size: 64,
            ..ServerConfig::new()
        };
        let (state, _) = test_state_with(config);
        let app = Server::from_state(state).router();

        let big = serde_json::json!({ "username": "a".repeat(200), "password": "secret123" });
        let response = send(&app, request("POST", "/api/v1/auth/login", Some(big), None)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let config = ServerConfig::new().with_cors_origins(vec!["https://chat.example".into()]);
        let (state, _) = test_state_with(config);
        let app = Server::from_state(state).router();

        let preflight = axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/api/v1/profile")
            .header("Origin", "https://chat.example")
            .header("Access-Control-Request-Method", "GET")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = send(&app, preflight).await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://chat.example"
        );
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new()
            .with_bind_address("0.0.0.0:9000".parse().unwrap())
            .with_rate_limiting(false)
            .with_request_logging(true);

        assert_eq!(config.bind_address.port(), 9000);
        assert!(!config.rate_limiting);
        assert!(config.request_logging);
    }
}
