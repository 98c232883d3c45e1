//! OpenAPI documentation configuration.

use axum::Json;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use super::{auth, conversations, health, messages, profile};
use crate::error::ErrorResponse;

/// OpenAPI documentation for the Parley API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parley API",
        description = "Chat gateway: accounts, conversations and streamed replies",
        version = "1.0.0",
        license(name = "MIT"),
    ),
    servers(
        (url = "/", description = "Local server"),
    ),
    paths(
        // Health
        health::health,
        health::upstream_health,
        // Auth
        auth::register_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::delete_account_handler,
        // Profile
        profile::profile_handler,
        profile::get_memory_handler,
        profile::set_memory_handler,
        profile::delete_memory_handler,
        // Conversations
        conversations::create_conversation_handler,
        conversations::list_conversations_handler,
        conversations::update_conversation_handler,
        conversations::delete_conversation_handler,
        // Messages
        messages::list_messages_handler,
        messages::send_message_handler,
        messages::cancel_handler,
    ),
    components(
        schemas(
            ErrorResponse,
            // Health
            health::HealthResponse,
            health::UpstreamHealthResponse,
            // Auth
            auth::CredentialsRequest,
            auth::TokenResponse,
            auth::OkResponse,
            // Profile
            profile::ProfileResponse,
            profile::SetMemoryRequest,
            profile::MemoryResponse,
            // Conversations
            conversations::CreateConversationRequest,
            conversations::CreateConversationResponse,
            conversations::ConversationListItem,
            conversations::ListConversationsResponse,
            conversations::UpdateConversationRequest,
            conversations::ConversationResponse,
            // Messages
            super::MessageResponse,
            messages::ListMessagesResponse,
            messages::SendMessageRequest,
            messages::SendMessageResponse,
            messages::CancelResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness of the gateway and its backend"),
        (name = "auth", description = "Accounts and session tokens"),
        (name = "profile", description = "The signed-in caller"),
        (name = "conversations", description = "Conversation management"),
        (name = "messages", description = "History, sending and cancellation"),
    )
)]
pub struct ApiDoc;

/// Declares the two ways a session token can be presented.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
            components.add_security_scheme(
                "cookie_auth",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                    parley_config::DEFAULT_COOKIE_NAME,
                ))),
            );
        }
    }
}

/// GET /api/openapi.json - The OpenAPI document.
pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
