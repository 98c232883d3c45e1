//! Streaming relay between the backend and one client.
//!
//! A [`StreamRelay`] drives a single streamed reply through
//! `Init → Streaming → {Complete, Failed, Cancelled}`. Each chunk is forwarded
//! to the client as soon as it arrives. Only a complete reply is persisted,
//! in one transaction together with the conversation's last-message pointer.
//! Cancellation (an explicit request, the client going away, or the exchange
//! deadline) is forwarded to the backend exactly once.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use parley_store::{ConversationStore, Message, StoreError};
use parley_upstream::{CancelRequest, ChatRequest, SharedProvider, StreamChunk};

/// How long a terminal event may wait for room in the client channel.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Persistence seam
// ─────────────────────────────────────────────────────────────────────────────

/// Where completed replies are written.
pub trait ReplySink: Send + Sync {
    /// Store the assistant message and move the conversation pointer to it,
    /// atomically.
    fn record_reply(
        &self,
        conversation_id: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError>;
}

impl ReplySink for ConversationStore {
    fn record_reply(
        &self,
        conversation_id: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        ConversationStore::record_reply(self, conversation_id, content, at)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// One forwarded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEvent {
    pub content: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
    /// Only present on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub code: String,
    pub message: String,
    pub chunks_delivered: usize,
}

/// The reply reached the client but was not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEvent {
    pub code: String,
    pub message: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledEvent {
    pub chunks_delivered: usize,
}

/// Everything a relay sends to its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Chunk(ChunkEvent),
    Failed(FailureEvent),
    Reconcile(ReconcileEvent),
    Cancelled(CancelledEvent),
}

impl RelayEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Chunk(_) => "message",
            RelayEvent::Failed(_) => "error",
            RelayEvent::Reconcile(_) => "reconcile",
            RelayEvent::Cancelled(_) => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            RelayEvent::Chunk(chunk) => chunk.is_final,
            _ => true,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            RelayEvent::Chunk(e) => serde_json::to_string(e),
            RelayEvent::Failed(e) => serde_json::to_string(e),
            RelayEvent::Reconcile(e) => serde_json::to_string(e),
            RelayEvent::Cancelled(e) => serde_json::to_string(e),
        }
    }

    pub fn into_sse(self) -> Event {
        let event = Event::default().event(self.name());
        match self.to_json() {
            Ok(data) => event.data(data),
            Err(e) => {
                error!(error = %e, "Failed to serialize relay event");
                Event::default()
                    .event("error")
                    .data(r#"{"code":"internal_error","message":"unserializable event","chunks_delivered":0}"#)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayState::Complete | RelayState::Failed | RelayState::Cancelled
        )
    }
}

/// Why a relay ended in [`RelayState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayFailure {
    /// The backend reported an error.
    Upstream,
    /// The exchange deadline passed.
    Timeout,
    /// The stream ended without a final chunk.
    Closed,
    /// The reply was delivered but could not be stored.
    Persistence,
}

impl RelayFailure {
    pub fn code(&self) -> &'static str {
        match self {
            RelayFailure::Upstream => "upstream_failed",
            RelayFailure::Timeout => "upstream_timeout",
            RelayFailure::Closed => "upstream_closed",
            RelayFailure::Persistence => "persistence_failed",
        }
    }
}

/// Progress of one streamed reply.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: Uuid,
    pub accumulated: String,
    /// Chunks received from the backend.
    pub sequence: usize,
    /// Chunks accepted by the client channel.
    pub delivered: usize,
    pub is_final: bool,
    pub token_usage: Option<i32>,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            accumulated: String::new(),
            sequence: 0,
            delivered: 0,
            is_final: false,
            token_usage: None,
        }
    }

    fn push(&mut self, chunk: StreamChunk) -> RelayEvent {
        self.accumulated.push_str(&chunk.output);
        self.sequence += 1;
        self.is_final = chunk.is_final;
        if chunk.is_final {
            self.token_usage = Some(chunk.token_usage);
        }

        RelayEvent::Chunk(ChunkEvent {
            content: chunk.output,
            is_final: chunk.is_final,
            created_at: Utc::now(),
            token_usage: chunk.is_final.then_some(chunk.token_usage),
            node_name: chunk.node_name,
        })
    }
}

/// How a relay ended.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub state: RelayState,
    pub session: StreamSession,
    pub failure: Option<RelayFailure>,
    /// The stored assistant message, on [`RelayState::Complete`].
    pub reply: Option<Message>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────────────────

/// What stopped a wait short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    ClientGone,
    Deadline,
}

enum Race<T> {
    Done(T),
    Interrupted(Interrupt),
}

/// Wait for `fut` unless the relay is cancelled, the client hangs up, or the
/// deadline passes first.
async fn race<T>(
    cancel: &CancellationToken,
    events: &mpsc::Sender<RelayEvent>,
    deadline: Instant,
    fut: impl Future<Output = T>,
) -> Race<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Race::Interrupted(Interrupt::Cancelled),
        _ = events.closed() => Race::Interrupted(Interrupt::ClientGone),
        out = tokio::time::timeout_at(deadline, fut) => match out {
            Ok(value) => Race::Done(value),
            Err(_) => Race::Interrupted(Interrupt::Deadline),
        },
    }
}

/// Relays one streamed reply. Consumed by [`run`](Self::run).
pub struct StreamRelay {
    provider: SharedProvider,
    sink: Arc<dyn ReplySink>,
    request: ChatRequest,
    cancel: CancellationToken,
    session: StreamSession,
    state: RelayState,
}

impl StreamRelay {
    pub fn new(provider: SharedProvider, sink: Arc<dyn ReplySink>, request: ChatRequest) -> Self {
        Self {
            provider,
            sink,
            request,
            cancel: CancellationToken::new(),
            session: StreamSession::new(),
            state: RelayState::Init,
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this relay.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session_id(&self) -> Uuid {
        self.session.session_id
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Drive the reply to a terminal state, sending events to `events`.
    ///
    /// The client counts as gone once the receiving half is dropped.
    pub async fn run(self, events: mpsc::Sender<RelayEvent>) -> RelayOutcome {
        let span = info_span!(
            "relay",
            conversation_id = %self.request.thread_id,
            session_id = %self.session.session_id,
        );
        self.drive(events).instrument(span).await
    }

    async fn drive(mut self, events: mpsc::Sender<RelayEvent>) -> RelayOutcome {
        let deadline = self.request.deadline;
        self.state = RelayState::Streaming;
        debug!(provider = self.provider.name(), "Opening upstream stream");

        let opened = race(
            &self.cancel,
            &events,
            deadline,
            self.provider.chat_stream(self.request.clone()),
        )
        .await;

        let mut stream = match opened {
            Race::Done(Ok(stream)) => stream,
            Race::Done(Err(e)) => {
                let failure = if e.is_timeout() {
                    RelayFailure::Timeout
                } else {
                    RelayFailure::Upstream
                };
                return self.fail(&events, failure, e.to_string()).await;
            }
            Race::Interrupted(reason) => return self.interrupt(&events, reason).await,
        };

        loop {
            match race(&self.cancel, &events, deadline, stream.next()).await {
                Race::Done(Some(Ok(chunk))) => {
                    let is_final = chunk.is_final;
                    let event = self.session.push(chunk);

                    match race(&self.cancel, &events, deadline, events.send(event)).await {
                        Race::Done(Ok(())) => self.session.delivered += 1,
                        Race::Done(Err(_)) => {
                            return self.interrupt(&events, Interrupt::ClientGone).await;
                        }
                        Race::Interrupted(reason) => return self.interrupt(&events, reason).await,
                    }

                    if is_final {
                        return self.complete(&events).await;
                    }
                }
                Race::Done(Some(Err(e))) => {
                    return self.fail(&events, RelayFailure::Upstream, e.to_string()).await;
                }
                Race::Done(None) => {
                    return self
                        .fail(
                            &events,
                            RelayFailure::Closed,
                            "upstream closed the stream before the final chunk".to_string(),
                        )
                        .await;
                }
                Race::Interrupted(reason) => return self.interrupt(&events, reason).await,
            }
        }
    }

    async fn complete(mut self, events: &mpsc::Sender<RelayEvent>) -> RelayOutcome {
        let conversation_id = self.request.thread_id.clone();

        let stored = self
            .sink
            .record_reply(&conversation_id, &self.session.accumulated, Utc::now());

        match stored {
            Ok(message) => {
                self.state = RelayState::Complete;
                info!(
                    chunks_delivered = self.session.delivered,
                    message_id = message.id,
                    "Stream complete"
                );
                self.finish(None, Some(message))
            }
            Err(e) => {
                error!(
                    reconcile = true,
                    chunks_delivered = self.session.delivered,
                    error = %e,
                    "Reply delivered but not persisted"
                );
                send_terminal(
                    events,
                    RelayEvent::Reconcile(ReconcileEvent {
                        code: RelayFailure::Persistence.code().to_string(),
                        message: "reply was delivered but could not be saved".to_string(),
                        content: self.session.accumulated.clone(),
                    }),
                )
                .await;
                self.state = RelayState::Failed;
                self.finish(Some(RelayFailure::Persistence), None)
            }
        }
    }

    async fn fail(
        mut self,
        events: &mpsc::Sender<RelayEvent>,
        failure: RelayFailure,
        message: String,
    ) -> RelayOutcome {
        error!(
            code = failure.code(),
            chunks_delivered = self.session.delivered,
            error = %message,
            "Stream failed"
        );
        send_terminal(
            events,
            RelayEvent::Failed(FailureEvent {
                code: failure.code().to_string(),
                message,
                chunks_delivered: self.session.delivered,
            }),
        )
        .await;
        self.state = RelayState::Failed;
        self.finish(Some(failure), None)
    }

    async fn interrupt(
        mut self,
        events: &mpsc::Sender<RelayEvent>,
        reason: Interrupt,
    ) -> RelayOutcome {
        self.cancel_upstream().await;

        if reason == Interrupt::Deadline {
            return self
                .fail(
                    events,
                    RelayFailure::Timeout,
                    "exchange deadline exceeded".to_string(),
                )
                .await;
        }

        info!(
            client_gone = reason == Interrupt::ClientGone,
            chunks_delivered = self.session.delivered,
            "Stream cancelled"
        );
        send_terminal(
            events,
            RelayEvent::Cancelled(CancelledEvent {
                chunks_delivered: self.session.delivered,
            }),
        )
        .await;
        self.state = RelayState::Cancelled;
        self.finish(None, None)
    }

    async fn cancel_upstream(&self) {
        let request = CancelRequest {
            user_id: self.request.user_id.clone(),
            user_name: self.request.user_name.clone(),
            thread_id: self.request.thread_id.clone(),
        };
        match self.provider.cancel(request).await {
            Ok(outcome) if outcome.success => debug!("Upstream generation cancelled"),
            Ok(outcome) => warn!(message = %outcome.message, "Upstream refused cancel"),
            Err(e) => warn!(error = %e, "Upstream cancel failed"),
        }
    }

    fn finish(self, failure: Option<RelayFailure>, reply: Option<Message>) -> RelayOutcome {
        RelayOutcome {
            state: self.state,
            session: self.session,
            failure,
            reply,
        }
    }
}

/// Best-effort delivery of a closing event. The client may already be gone.
async fn send_terminal(events: &mpsc::Sender<RelayEvent>, event: RelayEvent) {
    if events
        .send_timeout(event, TERMINAL_SEND_TIMEOUT)
        .await
        .is_err()
    {
        debug!("Terminal event not delivered");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Active relays
// ─────────────────────────────────────────────────────────────────────────────

/// Cancellation tokens of the relays currently running, by conversation.
#[derive(Debug, Default)]
pub struct ActiveRelays {
    inner: Mutex<HashMap<String, CancellationToken>>,
}

impl ActiveRelays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a conversation for a new relay.
    ///
    /// Returns `None` while another relay holds it. The claim is released
    /// when the registration is dropped.
    pub fn register(self: &Arc<Self>, conversation_id: &str) -> Option<RelayRegistration> {
        let mut inner = self.inner.lock();
        match inner.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Some(RelayRegistration {
                    relays: Arc::clone(self),
                    conversation_id: conversation_id.to_string(),
                    token,
                })
            }
        }
    }

    /// Fire the cancellation token of the conversation's relay, if any.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.inner.lock().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Fire every registered token. Returns how many were fired.
    pub fn cancel_all(&self) -> usize {
        let inner = self.inner.lock();
        for token in inner.values() {
            token.cancel();
        }
        inner.len()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner.lock().contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// A held claim on a conversation's relay slot.
#[derive(Debug)]
pub struct RelayRegistration {
    relays: Arc<ActiveRelays>,
    conversation_id: String,
    token: CancellationToken,
}

impl RelayRegistration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RelayRegistration {
    fn drop(&mut self) {
        self.relays.inner.lock().remove(&self.conversation_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
