//! Request and response types exchanged with the backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How the backend should answer a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// One complete reply.
    #[default]
    Invoke,
    /// Incremental chunks.
    Stream,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Invoke => "invoke",
            ChatMode::Stream => "stream",
        }
    }
}

/// Longest wait a deadline is allowed to express.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

/// One chat exchange with the backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_input: String,
    pub user_id: String,
    pub user_name: String,
    /// Conversation id, forwarded as the backend's thread id.
    pub thread_id: String,
    pub mode: ChatMode,
    pub recursion_limit: u32,
    /// Point after which the whole exchange is abandoned.
    pub deadline: Instant,
}

impl ChatRequest {
    pub fn new(
        user_input: impl Into<String>,
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            user_input: user_input.into(),
            user_id: user_id.into(),
            user_name: String::new(),
            thread_id: thread_id.into(),
            mode: ChatMode::Invoke,
            recursion_limit: 25,
            deadline: deadline_after(timeout),
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A complete reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub token_usage: i32,
}

/// One increment of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub output: String,
    /// Set on the terminal chunk.
    pub is_final: bool,
    pub token_usage: i32,
    /// Backend graph node that produced the chunk, when reported.
    pub node_name: Option<String>,
}

impl StreamChunk {
    pub fn partial(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_final: false,
            token_usage: 0,
            node_name: None,
        }
    }

    pub fn last(output: impl Into<String>, token_usage: i32) -> Self {
        Self {
            output: output.into(),
            is_final: true,
            token_usage,
            node_name: None,
        }
    }
}

/// Result of a cancel call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Backend build and uptime information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub run_time: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct WireChatRequest<'a> {
    pub user_input: &'a str,
    pub user_config: WireUserConfig<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireUserConfig<'a> {
    pub thread_id: &'a str,
    pub user_id: &'a str,
    pub chat_mode: &'a str,
    pub recursion_limit: u32,
}

impl<'a> From<&'a ChatRequest> for WireChatRequest<'a> {
    fn from(req: &'a ChatRequest) -> Self {
        Self {
            user_input: &req.user_input,
            user_config: WireUserConfig {
                thread_id: &req.thread_id,
                user_id: &req.user_id,
                chat_mode: req.mode.as_str(),
                recursion_limit: req.recursion_limit,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChatResponse {
    pub success: bool,
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub token_usage: i32,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireStreamChunk {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub final_response: bool,
    #[serde(default)]
    pub token: i32,
    #[serde(default)]
    pub node_name: String,
}

impl From<WireStreamChunk> for StreamChunk {
    fn from(wire: WireStreamChunk) -> Self {
        Self {
            output: wire.output,
            is_final: wire.final_response,
            token_usage: wire.token,
            node_name: Some(wire.node_name).filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WireCancelRequest<'a> {
    pub user_id: &'a str,
    pub thread_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_shape() {
        let req = ChatRequest::new("hello", "u1", "t1", Duration::from_secs(5))
            .with_mode(ChatMode::Stream)
            .with_recursion_limit(7);
        let json = serde_json::to_value(WireChatRequest::from(&req)).unwrap();
        assert_eq!(json["user_input"], "hello");
        assert_eq!(json["user_config"]["thread_id"], "t1");
        assert_eq!(json["user_config"]["chat_mode"], "stream");
        assert_eq!(json["user_config"]["recursion_limit"], 7);
    }

    #[test]
    fn test_wire_chunk_conversion() {
        let wire: WireStreamChunk =
            serde_json::from_str(r#"{"output":"hi","final_response":true,"token":12}"#).unwrap();
        let chunk = StreamChunk::from(wire);
        assert!(chunk.is_final);
        assert_eq!(chunk.token_usage, 12);
        assert_eq!(chunk.node_name, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_caps_deadline() {
        let req = ChatRequest::new("q", "u", "t", Duration::MAX);
        assert!(req.remaining() > Duration::from_secs(86_400 * 365));
        assert!(req.remaining() <= FAR_FUTURE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_saturates() {
        let req = ChatRequest::new("q", "u", "t", Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(req.remaining(), Duration::ZERO);
    }
}
