//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use parley_server::{AppState, Server, ServerConfig, SessionKeys};
use parley_store::ConversationStore;
use parley_upstream::MockProvider;

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    /// Scripted backend.
    pub provider: Arc<MockProvider>,
    /// Shared state, for inspecting the store and relays.
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    /// Holds the database file.
    pub temp_dir: TempDir,
}

impl TestServer {
    /// Start a new test server with default configuration.
    pub async fn start() -> Result<Self> {
        Self::start_with(
            ServerConfig::new()
                .with_rate_limiting(false)
                .with_request_logging(false),
        )
        .await
    }

    /// Start a server with the given configuration on a free port.
    pub async fn start_with(config: ServerConfig) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let store = ConversationStore::open(&temp_dir.path().join("parley.db"))?;
        let provider = Arc::new(MockProvider::new());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = config.with_bind_address(addr).with_bcrypt_cost(4);
        let state = AppState::new(config, store, provider.clone())
            .with_session_keys(SessionKeys::new("integration-secret", Duration::from_secs(3600)));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = Server::from_state(state.clone());
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            provider,
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
            temp_dir,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Register an account and return its session token.
    pub async fn register(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/api/v1/auth/register"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        anyhow::ensure!(resp.status().as_u16() == 201, "register failed: {}", resp.status());
        let body: serde_json::Value = resp.json().await?;
        Ok(body["token"].as_str().unwrap_or_default().to_string())
    }

    /// Create a conversation and return its id.
    pub async fn create_conversation(&self, token: &str, query: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/api/v1/conversations"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "user_query": query }))
            .send()
            .await?;
        anyhow::ensure!(resp.status().as_u16() == 201, "create failed: {}", resp.status());
        let body: serde_json::Value = resp.json().await?;
        Ok(body["conversation_id"].as_str().unwrap_or_default().to_string())
    }

    /// Check if server is healthy.
    pub async fn health(&self) -> Result<bool> {
        let resp = self.client.get(self.url("/health")).send().await?;
        Ok(resp.status().is_success())
    }

    /// Signal shutdown and wait for the server task to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            timeout(Duration::from_secs(5), handle).await??;
        }
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}
