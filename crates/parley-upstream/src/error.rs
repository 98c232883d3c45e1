//! Error types for upstream calls.

use thiserror::Error;

/// Result type alias using the upstream error type.
pub type Result<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The backend answered with an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transport failure before a response arrived.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected our credentials.
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The exchange deadline elapsed.
    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout(_))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else if err.is_connect() {
            UpstreamError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            UpstreamError::Serialization(err.to_string())
        } else {
            UpstreamError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for UpstreamError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        UpstreamError::Config(format!("Failed to sign credentials: {}", err))
    }
}
