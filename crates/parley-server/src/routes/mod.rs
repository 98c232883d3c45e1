//! API routes.

pub mod auth;
pub mod conversations;
pub mod health;
pub mod messages;
pub mod openapi;
pub mod profile;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use parley_store::Message;

pub use auth::{
    AccountRequest, CredentialsRequest, OkResponse, TokenResponse, delete_account_handler,
    login_handler, logout_handler, register_handler,
};
pub use conversations::{
    ConversationListItem, ConversationResponse, CreateConversationRequest,
    CreateConversationResponse, ListConversationsResponse, UpdateConversationRequest,
    create_conversation_handler, delete_conversation_handler, list_conversations_handler,
    update_conversation_handler,
};
pub use health::health_routes;
pub use messages::{
    CancelResponse, ListMessagesResponse, SendMessageRequest, SendMessageResponse,
    cancel_handler, list_messages_handler, send_message_handler,
};
pub use openapi::{ApiDoc, openapi_handler};
pub use profile::{
    MemoryResponse, ProfileResponse, SetMemoryRequest, delete_memory_handler, get_memory_handler,
    profile_handler, set_memory_handler,
};

/// A stored message as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    /// `user`, `assistant`, `system` or `tool`.
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        Router,
        body::Body,
        http::{Request, Response, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::Server;
    use crate::state::AppState;

    pub fn app(state: AppState) -> Router {
        Server::from_state(state).router()
    }

    pub fn request(method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
        app.clone().oneshot(request).await.unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Register an account and return its session token.
    pub async fn register(app: &Router, username: &str) -> String {
        let response = send(
            app,
            request(
                "POST",
                "/api/v1/auth/register",
                Some(serde_json::json!({ "username": username, "password": "secret123" })),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["token"].as_str().unwrap().to_string()
    }

    /// Create a conversation and return its id.
    pub async fn create_conversation(app: &Router, token: &str, query: &str) -> String {
        let response = send(
            app,
            request(
                "POST",
                "/api/v1/conversations",
                Some(serde_json::json!({ "user_query": query })),
                Some(token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["conversation_id"]
            .as_str()
            .unwrap()
            .to_string()
    }
}
