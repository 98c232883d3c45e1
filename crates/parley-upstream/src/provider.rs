//! The backend seam.
//!
//! Everything the gateway asks of the generation backend goes through
//! [`ChatProvider`]. [`HttpProvider`](crate::HttpProvider) talks to a real
//! backend; `MockProvider` (behind the `testing` feature) scripts replies.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::Result;
use crate::types::{CancelOutcome, ChatReply, ChatRequest, ServerInfo, StreamChunk};

/// Stream of chunks for one streamed reply.
///
/// The stream ends after the terminal chunk. Ending without one means the
/// backend went away mid-reply.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Identifies the in-flight generation to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub user_id: String,
    pub user_name: String,
    pub thread_id: String,
}

/// Interface to the generation backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Whole-reply exchange, bounded by the request deadline.
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply>;

    /// Open a streamed exchange.
    ///
    /// Only the time to first byte is bounded here; the caller enforces the
    /// deadline while draining the stream.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream>;

    /// Ask the backend to stop generating for a thread.
    async fn cancel(&self, request: CancelRequest) -> Result<CancelOutcome>;

    /// Backend version and uptime.
    async fn info(&self) -> Result<ServerInfo>;

    /// Display name for logs.
    fn name(&self) -> &str;

    async fn health_check(&self) -> Result<()> {
        self.info().await.map(|_| ())
    }
}

/// A provider that can be shared across threads.
pub type SharedProvider = Arc<dyn ChatProvider>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Provider (for testing)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockProvider, MockStep};

#[cfg(any(test, feature = "testing"))]
mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::UpstreamError;

    /// One scripted step of a mock stream.
    #[derive(Debug, Clone)]
    pub enum MockStep {
        Chunk(StreamChunk),
        /// Yield an error item.
        Fail(String),
        /// Sleep before the next step.
        Delay(Duration),
        /// Never yield again.
        Hang,
    }

    /// Scripted provider.
    ///
    /// Queued replies and streams are used in order. With nothing queued,
    /// `chat` echoes the input and `chat_stream` yields a two-chunk reply.
    #[derive(Default)]
    pub struct MockProvider {
        replies: Mutex<VecDeque<std::result::Result<ChatReply, String>>>,
        streams: Mutex<VecDeque<std::result::Result<Vec<MockStep>, String>>>,
        requests: Mutex<Vec<ChatRequest>>,
        cancels: Mutex<Vec<CancelRequest>>,
        cancel_fails: AtomicBool,
        unhealthy: AtomicBool,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_reply(&self, reply: impl Into<String>, token_usage: i32) {
            self.replies.lock().push_back(Ok(ChatReply {
                reply: reply.into(),
                token_usage,
            }));
        }

        pub fn push_reply_error(&self, message: impl Into<String>) {
            self.replies.lock().push_back(Err(message.into()));
        }

        pub fn push_stream(&self, steps: Vec<MockStep>) {
            self.streams.lock().push_back(Ok(steps));
        }

        /// Make the next `chat_stream` call fail before any chunk.
        pub fn push_stream_error(&self, message: impl Into<String>) {
            self.streams.lock().push_back(Err(message.into()));
        }

        pub fn set_cancel_fails(&self, fails: bool) {
            self.cancel_fails.store(fails, Ordering::SeqCst);
        }

        pub fn set_unhealthy(&self, unhealthy: bool) {
            self.unhealthy.store(unhealthy, Ordering::SeqCst);
        }

        /// Requests received by `chat` and `chat_stream`.
        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        pub fn cancels(&self) -> Vec<CancelRequest> {
            self.cancels.lock().clone()
        }

        pub fn cancel_count(&self) -> usize {
            self.cancels.lock().len()
        }
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
            let echo = format!("echo: {}", request.user_input);
            self.requests.lock().push(request);

            match self.replies.lock().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(UpstreamError::Backend(message)),
                None => Ok(ChatReply {
                    reply: echo,
                    token_usage: 1,
                }),
            }
        }

        async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
            self.requests.lock().push(request);

            let steps = match self.streams.lock().pop_front() {
                Some(Ok(steps)) => steps,
                Some(Err(message)) => return Err(UpstreamError::Backend(message)),
                None => vec![
                    MockStep::Chunk(StreamChunk::partial("Hello")),
                    MockStep::Chunk(StreamChunk::last(" world", 2)),
                ],
            };

            let stream = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
                loop {
                    let Some(step) = steps.next() else {
                        return None;
                    };
                    match step {
                        MockStep::Chunk(chunk) => return Some((Result::Ok(chunk), steps)),
                        MockStep::Fail(message) => {
                            return Some((Err(UpstreamError::Backend(message)), steps));
                        }
                        MockStep::Delay(d) => tokio::time::sleep(d).await,
                        MockStep::Hang => futures::future::pending::<()>().await,
                    }
                }
            });
            Ok(Box::pin(stream))
        }

        async fn cancel(&self, request: CancelRequest) -> Result<CancelOutcome> {
            self.cancels.lock().push(request);
            if self.cancel_fails.load(Ordering::SeqCst) {
                return Err(UpstreamError::Backend("cancel rejected".to_string()));
            }
            Ok(CancelOutcome {
                success: true,
                message: "cancelled".to_string(),
            })
        }

        async fn info(&self) -> Result<ServerInfo> {
            if self.unhealthy.load(Ordering::SeqCst) {
                return Err(UpstreamError::Network("mock backend is down".to_string()));
            }
            Ok(ServerInfo {
                version: "mock".to_string(),
                start_time: String::new(),
                run_time: String::new(),
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
