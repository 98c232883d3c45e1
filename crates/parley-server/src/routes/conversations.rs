//! Conversation endpoints.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use parley_store::{ConversationUpdate, NewConversation};
use parley_upstream::{ChatMode, ChatRequest};

use super::MessageResponse;
use crate::auth::Identity;
use crate::error::ServerError;
use crate::state::AppState;

/// Longest generated conversation name, in characters.
pub const MAX_TITLE_CHARS: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    /// Client-chosen id; generated when absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// First message of the conversation.
    pub user_query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConversationResponse {
    pub conversation_id: String,
    pub conversation_name: String,
    /// The user message and the first reply.
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationListItem {
    pub id: String,
    pub conversation_name: String,
    pub last_msg_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListConversationsResponse {
    pub conversations: Vec<ConversationListItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub conversation_name: Option<String>,
    #[serde(default)]
    pub pin_to_top: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationResponse {
    pub id: String,
    pub conversation_name: String,
    pub last_msg_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/conversations - Start a conversation with its first exchange.
#[utoipa::path(
    post,
    path = "/api/v1/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = CreateConversationResponse),
        (status = 400, description = "Empty query"),
        (status = 409, description = "Conversation id already in use"),
        (status = 502, description = "Backend error"),
        (status = 504, description = "Backend timed out"),
    ),
    tag = "conversations"
)]
pub async fn create_conversation_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), ServerError> {
    let query = request.user_query.trim();
    if query.is_empty() {
        return Err(ServerError::BadRequest("user_query is required".to_string()));
    }

    let conversation_id = match request.conversation_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };

    let user_at = Utc::now();
    let name = generate_title(&state, &identity, &conversation_id, query).await;

    let reply = state
        .provider
        .chat(exchange(&state, &identity, &conversation_id, query))
        .await?;

    let (conversation, messages) = state.store.create_conversation(NewConversation {
        id: &conversation_id,
        user_id: &identity.user_id,
        name: &name,
        user_message: query,
        user_at,
        reply: &reply.reply,
        reply_at: Utc::now(),
    })?;

    tracing::info!(
        conversation_id = %conversation.id,
        token_usage = reply.token_usage,
        "Created conversation"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse {
            conversation_id: conversation.id,
            conversation_name: conversation.name,
            messages: messages.iter().map(MessageResponse::from).collect(),
        }),
    ))
}

/// GET /api/v1/conversations - The caller's conversations, most recent first.
#[utoipa::path(
    get,
    path = "/api/v1/conversations",
    responses(
        (status = 200, description = "Conversations", body = ListConversationsResponse),
    ),
    tag = "conversations"
)]
pub async fn list_conversations_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ListConversationsResponse>, ServerError> {
    let conversations = state
        .store
        .list_conversations(&identity.user_id)?
        .into_iter()
        .map(|c| ConversationListItem {
            id: c.id,
            conversation_name: c.name,
            last_msg_time: c.last_msg_time,
        })
        .collect();

    Ok(Json(ListConversationsResponse { conversations }))
}

/// PATCH /api/v1/conversations/{id} - Rename or pin a conversation.
#[utoipa::path(
    patch,
    path = "/api/v1/conversations/{id}",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = UpdateConversationRequest,
    responses(
        (status = 200, description = "Updated conversation", body = ConversationResponse),
        (status = 404, description = "No such conversation"),
    ),
    tag = "conversations"
)]
pub async fn update_conversation_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let update = ConversationUpdate {
        name: request.conversation_name,
        pin_to_top: request.pin_to_top.unwrap_or(false),
    };
    state
        .store
        .update_conversation(&id, &identity.user_id, &update)?;

    let conversation = state.store.get_conversation(&id, &identity.user_id)?;
    Ok(Json(ConversationResponse {
        id: conversation.id,
        conversation_name: conversation.name,
        last_msg_time: conversation.last_msg_time,
        updated_at: conversation.updated_at,
    }))
}

/// DELETE /api/v1/conversations/{id} - Delete a conversation and its messages.
#[utoipa::path(
    delete,
    path = "/api/v1/conversations/{id}",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Missing id"),
        (status = 404, description = "No such conversation"),
    ),
    tag = "conversations"
)]
pub async fn delete_conversation_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let id = id.trim();
    if id.is_empty() || id == "undefined" {
        return Err(ServerError::BadRequest("conversation id is required".to_string()));
    }

    state.store.delete_conversation(id, &identity.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn exchange(state: &AppState, identity: &Identity, conversation_id: &str, input: &str) -> ChatRequest {
    ChatRequest::new(
        input,
        identity.user_id.clone(),
        conversation_id,
        state.config.upstream_timeout,
    )
    .with_user_name(identity.username.clone())
    .with_mode(ChatMode::Invoke)
    .with_recursion_limit(state.config.recursion_limit)
}

fn title_prompt(query: &str) -> String {
    format!(
        "Generate a concise title of at most ten words for a conversation that starts with \
         the user input below. Output the title only.\nUser input: {query}"
    )
}

/// Ask the backend for a name, falling back to a prefix of the query.
async fn generate_title(
    state: &AppState,
    identity: &Identity,
    conversation_id: &str,
    query: &str,
) -> String {
    let request = exchange(state, identity, conversation_id, &title_prompt(query));
    match state.provider.chat(request).await {
        Ok(reply) => clean_title(&reply.reply).unwrap_or_else(|| truncate_chars(query)),
        Err(e) => {
            tracing::warn!(conversation_id, error = %e, "Title generation failed");
            truncate_chars(query)
        }
    }
}

/// First non-empty line, unquoted and capped at [`MAX_TITLE_CHARS`].
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    (!line.is_empty()).then(|| truncate_chars(line))
}

fn truncate_chars(s: &str) -> String {
    s.chars().take(MAX_TITLE_CHARS).collect::<String>().trim().to_string()
}
