//! HTTP client for the gateway's health endpoints.

use anyhow::Result;
use serde::Deserialize;

/// `GET /health`.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /health/upstream`.
#[derive(Debug, Deserialize)]
pub struct UpstreamHealthResponse {
    pub provider: String,
    pub version: String,
}

/// Client for a running gateway.
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    /// Create a new client for the given server URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url)?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("Not a usable server URL: {}", base_url);
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        })
    }

    /// Check gateway health.
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }

        Ok(response.json().await?)
    }

    /// Ask the gateway whether its backend answers.
    pub async fn upstream_health(&self) -> Result<UpstreamHealthResponse> {
        let response = self
            .http
            .get(format!("{}/health/upstream", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Backend check failed: {}", response.status());
        }

        Ok(response.json().await?)
    }
}
