//! HTTP/JSON client for the generation backend.
//!
//! Routes, relative to the configured base URL:
//! - `POST v1/chat` whole reply
//! - `POST v1/chat/stream` server-sent events, one JSON chunk per `data:` line
//!   and a literal `[DONE]` at the end
//! - `POST v1/tasks/cancel`
//! - `GET v1/info`

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};

use crate::credentials::UpstreamSigner;
use crate::error::{Result, UpstreamError};
use crate::provider::{CancelRequest, ChatProvider, ChunkStream};
use crate::types::{
    CancelOutcome, ChatReply, ChatRequest, ServerInfo, StreamChunk, WireCancelRequest,
    WireChatRequest, WireChatResponse, WireStreamChunk,
};

/// Marks the end of a streamed reply.
const DONE_SENTINEL: &str = "[DONE]";

/// Timeout for the small control calls (cancel, info).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`HttpProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub name: String,
    /// Signs request credentials. Without one, requests carry no credentials.
    pub signer: Option<UpstreamSigner>,
    pub connect_timeout: Duration,
}

impl HttpProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            name: "backend".to_string(),
            signer: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_signer(mut self, signer: UpstreamSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// [`ChatProvider`] over HTTP.
pub struct HttpProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: RequestBuilder, user_id: &str, user_name: &str) -> Result<RequestBuilder> {
        match &self.config.signer {
            Some(signer) => Ok(builder.bearer_auth(signer.sign(user_id, user_name)?)),
            None => Ok(builder),
        }
    }

    async fn handle_error_response(response: Response) -> UpstreamError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => UpstreamError::Auth(format!("HTTP {}: {}", status, body)),
            500..=599 => UpstreamError::Backend(format!("Server error {}: {}", status, body)),
            _ => UpstreamError::Backend(format!("HTTP {}: {}", status, body)),
        }
    }

    fn check_deadline(request: &ChatRequest) -> Result<Duration> {
        let remaining = request.remaining();
        if remaining.is_zero() {
            return Err(UpstreamError::Timeout(
                "deadline passed before the request was sent".to_string(),
            ));
        }
        Ok(remaining)
    }
}

#[async_trait]
impl ChatProvider for HttpProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let remaining = Self::check_deadline(&request)?;

        tracing::debug!(
            backend = %self.config.name,
            thread_id = %request.thread_id,
            timeout_ms = remaining.as_millis() as u64,
            "Sending chat request"
        );

        let builder = self
            .client
            .post(self.url("v1/chat"))
            .timeout(remaining)
            .json(&WireChatRequest::from(&request));
        let response = self
            .authorize(builder, &request.user_id, &request.user_name)?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body: WireChatResponse = response.json().await?;
        if !body.success {
            return Err(UpstreamError::Backend(if body.error_message.is_empty() {
                "backend reported failure".to_string()
            } else {
                body.error_message
            }));
        }

        Ok(ChatReply {
            reply: body.reply,
            token_usage: body.token_usage,
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        Self::check_deadline(&request)?;

        tracing::debug!(
            backend = %self.config.name,
            thread_id = %request.thread_id,
            "Opening chat stream"
        );

        let builder = self
            .client
            .post(self.url("v1/chat/stream"))
            .header("Accept", "text/event-stream")
            .json(&WireChatRequest::from(&request));
        let send = self
            .authorize(builder, &request.user_id, &request.user_name)?
            .send();

        let response = tokio::time::timeout_at(request.deadline, send)
            .await
            .map_err(|_| UpstreamError::Timeout("no response before the deadline".to_string()))??;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.data.trim() == DONE_SENTINEL);
                futures::future::ready(!done)
            })
            .filter_map(|result| async move {
                match result {
                    Ok(event) => {
                        if event.data.trim().is_empty() {
                            return None;
                        }
                        match serde_json::from_str::<WireStreamChunk>(&event.data) {
                            Ok(chunk) => Some(Ok(StreamChunk::from(chunk))),
                            Err(e) => {
                                tracing::warn!(data = %event.data, error = %e, "Failed to parse stream chunk");
                                Some(Err(UpstreamError::Serialization(e.to_string())))
                            }
                        }
                    }
                    Err(e) => Some(Err(UpstreamError::Network(e.to_string()))),
                }
            });

        Ok(Box::pin(stream))
    }

    async fn cancel(&self, request: CancelRequest) -> Result<CancelOutcome> {
        let builder = self
            .client
            .post(self.url("v1/tasks/cancel"))
            .timeout(CONTROL_TIMEOUT)
            .json(&WireCancelRequest {
                user_id: &request.user_id,
                thread_id: &request.thread_id,
            });
        let response = self
            .authorize(builder, &request.user_id, &request.user_name)?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn info(&self) -> Result<ServerInfo> {
        let builder = self.client.get(self.url("v1/info")).timeout(CONTROL_TIMEOUT);
        let response = self.authorize(builder, "gateway", "gateway")?.send().await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }
        Ok(response.json().await?)
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
