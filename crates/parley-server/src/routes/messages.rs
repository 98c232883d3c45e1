//! Message history, sending and cancellation.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::{IntoParams, ToSchema};

use parley_store::{MessageCursor, MessagePage, MessageRole};
use parley_upstream::{CancelRequest, ChatMode, ChatRequest};

use super::MessageResponse;
use crate::auth::Identity;
use crate::error::ServerError;
use crate::relay::StreamRelay;
use crate::state::AppState;

/// Events buffered between a relay and its SSE response.
const RELAY_BUFFER: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Paging parameters. Kept as strings so malformed values get a JSON 400.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListMessagesQuery {
    /// Page size, 1 to 100 (default 20).
    pub limit: Option<String>,
    /// RFC 3339 timestamp of the oldest message already seen.
    pub before_created_at: Option<String>,
    /// Id of the oldest message already seen.
    pub before_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListMessagesResponse {
    /// Oldest first.
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
    /// `invoke` (default) or `stream`.
    #[serde(default)]
    #[schema(value_type = String)]
    pub chat_mode: ChatMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageResponse {
    /// The stored assistant reply.
    pub message: MessageResponse,
    pub token_usage: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/conversations/{id}/messages - Page through history.
#[utoipa::path(
    get,
    path = "/api/v1/conversations/{id}/messages",
    params(("id" = String, Path, description = "Conversation id"), ListMessagesQuery),
    responses(
        (status = 200, description = "Messages, oldest first", body = ListMessagesResponse),
        (status = 400, description = "Malformed paging parameters"),
        (status = 404, description = "No such conversation"),
    ),
    tag = "messages"
)]
pub async fn list_messages_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<ListMessagesResponse>, ServerError> {
    let page = parse_page(&query)?;
    state.store.get_conversation(&id, &identity.user_id)?;

    let messages = state.store.list_messages(&id, &page)?;
    Ok(Json(ListMessagesResponse {
        messages: messages.iter().map(MessageResponse::from).collect(),
    }))
}

/// POST /api/v1/conversations/{id}/messages - Send a message.
///
/// `invoke` answers with the stored reply. `stream` answers with Server-Sent
/// Events: `message` per chunk, then possibly one of `error`, `reconcile` or
/// `cancelled`.
#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/messages",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Reply (invoke) or event stream (stream)", body = SendMessageResponse),
        (status = 400, description = "Empty message"),
        (status = 404, description = "No such conversation"),
        (status = 409, description = "A reply is already streaming"),
        (status = 502, description = "Backend error"),
        (status = 504, description = "Backend timed out"),
    ),
    tag = "messages"
)]
pub async fn send_message_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ServerError> {
    let content = request.content.trim().to_string();
    if content.is_empty() {
        return Err(ServerError::BadRequest("content is required".to_string()));
    }
    state.store.get_conversation(&id, &identity.user_id)?;

    let exchange = ChatRequest::new(
        content.clone(),
        identity.user_id.clone(),
        id.clone(),
        state.config.upstream_timeout,
    )
    .with_user_name(identity.username.clone())
    .with_mode(request.chat_mode)
    .with_recursion_limit(state.config.recursion_limit);

    match request.chat_mode {
        ChatMode::Invoke => invoke(&state, &id, &content, exchange).await,
        ChatMode::Stream => stream(&state, &id, &content, exchange),
    }
}

/// POST /api/v1/conversations/{id}/cancel - Stop the reply in progress.
#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/cancel",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Cancellation result", body = CancelResponse),
        (status = 404, description = "No such conversation"),
        (status = 502, description = "Backend refused", body = CancelResponse),
    ),
    tag = "messages"
)]
pub async fn cancel_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    state.store.get_conversation(&id, &identity.user_id)?;

    if state.relays.cancel(&id) {
        tracing::info!(conversation_id = %id, "Cancelling active stream");
        return Ok(Json(CancelResponse {
            success: true,
            message: "cancellation requested".to_string(),
        })
        .into_response());
    }

    let request = CancelRequest {
        user_id: identity.user_id,
        user_name: identity.username,
        thread_id: id.clone(),
    };
    match state.provider.cancel(request).await {
        Ok(outcome) => Ok(Json(CancelResponse {
            success: outcome.success,
            message: outcome.message,
        })
        .into_response()),
        Err(e) => {
            tracing::warn!(conversation_id = %id, error = %e, "Upstream cancel failed");
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(CancelResponse {
                    success: false,
                    message: e.to_string(),
                }),
            )
                .into_response())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Modes
// ─────────────────────────────────────────────────────────────────────────────

async fn invoke(
    state: &AppState,
    conversation_id: &str,
    content: &str,
    exchange: ChatRequest,
) -> Result<Response, ServerError> {
    let user_at = Utc::now();
    let reply = state.provider.chat(exchange).await?;

    let stored = state
        .store
        .append_exchange(conversation_id, content, user_at, &reply.reply, Utc::now())?;
    let message = stored
        .last()
        .map(MessageResponse::from)
        .ok_or_else(|| ServerError::Internal("exchange stored no reply".to_string()))?;

    Ok(Json(SendMessageResponse {
        message,
        token_usage: reply.token_usage,
    })
    .into_response())
}

fn stream(
    state: &AppState,
    conversation_id: &str,
    content: &str,
    exchange: ChatRequest,
) -> Result<Response, ServerError> {
    let registration = state.relays.register(conversation_id).ok_or_else(|| {
        ServerError::Conflict("a reply is already streaming for this conversation".to_string())
    })?;

    // The question is kept even if the reply never completes.
    state
        .store
        .append_message(conversation_id, MessageRole::User, content, Utc::now())?;

    let relay = StreamRelay::new(state.provider.clone(), state.store.clone(), exchange)
        .with_cancellation(registration.token());
    let (tx, mut rx) = mpsc::channel(RELAY_BUFFER);

    tokio::spawn(async move {
        let _registration = registration;
        relay.run(tx).await;
    });

    let events = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(event.into_sse());
        }
    };

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

// ─────────────────────────────────────────────────────────────────────────────
// Paging
// ─────────────────────────────────────────────────────────────────────────────

fn parse_page(query: &ListMessagesQuery) -> Result<MessagePage, ServerError> {
    let limit = match query.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            ServerError::BadRequest(format!("limit must be a number, got '{raw}'"))
        })?),
        None => None,
    };
    let page = MessagePage::new(limit);

    let created_at = query.before_created_at.as_deref().filter(|s| !s.is_empty());
    let before_id = query.before_id.as_deref().filter(|s| !s.is_empty());

    match (created_at, before_id) {
        (None, None) => Ok(page),
        (Some(created_at), Some(before_id)) => {
            let created_at = DateTime::parse_from_rfc3339(created_at)
                .map_err(|_| {
                    ServerError::BadRequest("before_created_at must be RFC 3339".to_string())
                })?
                .with_timezone(&Utc);
            let id = before_id
                .parse::<i64>()
                .map_err(|_| ServerError::BadRequest("before_id must be a number".to_string()))?;
            Ok(page.before(MessageCursor { created_at, id }))
        }
        _ => Err(ServerError::BadRequest(
            "before_created_at and before_id must be given together".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::*;
    use crate::state::test_state;
    use parley_upstream::{MockStep, StreamChunk};
    use serde_json::json;

    fn query(limit: Option<&str>, created_at: Option<&str>, id: Option<&str>) -> ListMessagesQuery {
        ListMessagesQuery {
            limit: limit.map(String::from),
            before_created_at: created_at.map(String::from),
            before_id: id.map(String::from),
        }
    }

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page(&query(None, None, None)).unwrap().limit, 20);
        assert_eq!(parse_page(&query(Some("500"), None, None)).unwrap().limit, 100);
        assert_eq!(parse_page(&query(Some("0"), None, None)).unwrap().limit, 1);
        assert!(parse_page(&query(Some("ten"), None, None)).is_err());

        let page = parse_page(&query(None, Some("2026-01-02T03:04:05Z"), Some("7"))).unwrap();
        assert_eq!(page.before.unwrap().id, 7);

        assert!(parse_page(&query(None, Some("2026-01-02T03:04:05Z"), None)).is_err());
        assert!(parse_page(&query(None, None, Some("7"))).is_err());
        assert!(parse_page(&query(None, Some("yesterday"), Some("7"))).is_err());
    }

    async fn setup() -> (axum::Router, std::sync::Arc<parley_upstream::MockProvider>, String, String) {
        let (state, provider) = test_state();
        let app = app(state);
        let token = register(&app, "alice").await;
        let id = create_conversation(&app, &token, "first question").await;
        (app, provider, token, id)
    }

    #[tokio::test]
    async fn test_invoke_appends_exchange() {
        let (app, provider, token, id) = setup().await;
        provider.push_reply("second answer", 11);

        let response = send(
            &app,
            request(
                "POST",
                &format!("/api/v1/conversations/{id}/messages"),
                Some(json!({ "content": "second question", "chat_mode": "invoke" })),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"]["content"], "second answer");
        assert_eq!(body["message"]["role"], "assistant");
        assert_eq!(body["token_usage"], 11);

        let history = send(
            &app,
            request("GET", &format!("/api/v1/conversations/{id}/messages"), None, Some(&token)),
        )
        .await;
        let body = body_json(history).await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2]["content"], "second question");
        assert_eq!(messages[3]["content"], "second answer");
    }

    #[tokio::test]
    async fn test_history_paging() {
        let (app, _, token, id) = setup().await;
        for i in 0..3 {
            send(
                &app,
                request(
                    "POST",
                    &format!("/api/v1/conversations/{id}/messages"),
                    Some(json!({ "content": format!("q{i}") })),
                    Some(&token),
                ),
            )
            .await;
        }

        let newest = send(
            &app,
            request(
                "GET",
                &format!("/api/v1/conversations/{id}/messages?limit=2"),
                None,
                Some(&token),
            ),
        )
        .await;
        let body = body_json(newest).await;
        let page = body["messages"].as_array().unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["content"], "q2");

        let oldest = &page[0];
        let uri = format!(
            "/api/v1/conversations/{id}/messages?limit=2&before_created_at={}&before_id={}",
            oldest["created_at"].as_str().unwrap().replace('+', "%2B"),
            oldest["id"]
        );
        let older = send(&app, request("GET", &uri, None, Some(&token))).await;
        assert_eq!(older.status(), StatusCode::OK);
        let body = body_json(older).await;
        let page = body["messages"].as_array().unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1]["content"], "echo: q1");
    }

    #[tokio::test]
    async fn test_history_bad_limit() {
        let (app, _, token, id) = setup().await;
        let response = send(
            &app,
            request(
                "GET",
                &format!("/api/v1/conversations/{id}/messages?limit=abc"),
                None,
                Some(&token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_history_of_other_user_is_not_found() {
        let (app, _, _, id) = setup().await;
        let bob = register(&app, "bob").await;
        let response = send(
            &app,
            request("GET", &format!("/api/v1/conversations/{id}/messages"), None, Some(&bob)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_mode_emits_events_and_persists() {
        let (app, provider, token, id) = setup().await;
        provider.push_stream(vec![
            MockStep::Chunk(StreamChunk::partial("He")),
            MockStep::Chunk(StreamChunk::partial("llo")),
            MockStep::Chunk(StreamChunk::last("", 4)),
        ]);

        let response = send(
            &app,
            request(
                "POST",
                &format!("/api/v1/conversations/{id}/messages"),
                Some(json!({ "content": "greet me", "chat_mode": "stream" })),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

        let text = body_text(response).await;
        assert_eq!(text.matches("event: message").count(), 3);
        let he = text.find("\"content\":\"He\"").unwrap();
        let llo = text.find("\"content\":\"llo\"").unwrap();
        assert!(he < llo);
        assert!(text.contains("\"token_usage\":4"));

        // The body ends only after the relay has stored the reply.
        let history = send(
            &app,
            request("GET", &format!("/api/v1/conversations/{id}/messages"), None, Some(&token)),
        )
        .await;
        let body = body_json(history).await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[messages.len() - 2]["content"], "greet me");
        assert_eq!(messages[messages.len() - 1]["content"], "Hello");
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_user_message_only() {
        let (app, provider, token, id) = setup().await;
        provider.push_stream(vec![
            MockStep::Chunk(StreamChunk::partial("He")),
            MockStep::Fail("boom".into()),
        ]);

        let response = send(
            &app,
            request(
                "POST",
                &format!("/api/v1/conversations/{id}/messages"),
                Some(json!({ "content": "greet me", "chat_mode": "stream" })),
                Some(&token),
            ),
        )
        .await;
        let text = body_text(response).await;
        assert!(text.contains("event: error"));
        assert!(text.contains("upstream_failed"));

        let history = send(
            &app,
            request("GET", &format!("/api/v1/conversations/{id}/messages"), None, Some(&token)),
        )
        .await;
        let body = body_json(history).await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
    }

    #[tokio::test]
    async fn test_second_stream_conflicts_and_cancel_reaches_relay() {
        let (state, provider) = test_state();
        let app = app(state.clone());
        let token = register(&app, "alice").await;
        let id = create_conversation(&app, &token, "first").await;
        provider.push_stream(vec![MockStep::Chunk(StreamChunk::partial("a")), MockStep::Hang]);

        let uri = format!("/api/v1/conversations/{id}/messages");
        let body = json!({ "content": "go", "chat_mode": "stream" });

        let first = send(&app, request("POST", &uri, Some(body.clone()), Some(&token))).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert!(state.relays.is_active(&id));

        let second = send(&app, request("POST", &uri, Some(body), Some(&token))).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let cancel = send(
            &app,
            request("POST", &format!("/api/v1/conversations/{id}/cancel"), None, Some(&token)),
        )
        .await;
        assert_eq!(cancel.status(), StatusCode::OK);

        let text = body_text(first).await;
        assert!(text.contains("event: cancelled"));
        assert_eq!(provider.cancel_count(), 1);
        assert!(!state.relays.is_active(&id));
    }

    #[tokio::test]
    async fn test_cancel_without_stream_goes_upstream() {
        let (app, provider, token, id) = setup().await;
        let uri = format!("/api/v1/conversations/{id}/cancel");

        let response = send(&app, request("POST", &uri, None, Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
        assert_eq!(provider.cancels()[0].thread_id, id);

        provider.set_cancel_fails(true);
        let response = send(&app, request("POST", &uri, None, Some(&token))).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["success"], false);
    }
}
