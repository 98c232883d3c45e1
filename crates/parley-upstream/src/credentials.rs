//! Short-lived credentials attached to every upstream request.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Lifetime of one upstream credential.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Claims understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamClaims {
    pub user_id: String,
    pub user_name: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Signs HS256 bearer tokens with the shared upstream secret.
#[derive(Clone)]
pub struct UpstreamSigner {
    key: EncodingKey,
    ttl: Duration,
}

impl UpstreamSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            ttl: CREDENTIAL_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a token for one user.
    pub fn sign(&self, user_id: &str, user_name: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = UpstreamClaims {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.key)?)
    }
}

impl std::fmt::Debug for UpstreamSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
