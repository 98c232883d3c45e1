//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [server]            # listener, CORS, body limit
//! [auth]              # session tokens and password hashing
//! [limits.login]      # admission bucket for logins
//! [limits.register]   # admission bucket for registrations
//! [cache]             # identity cache
//! [upstream]          # generation backend
//! [database]
//! [logging]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use parley_cache::{CacheConfig, SweepMode};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;
pub const DEFAULT_COOKIE_NAME: &str = "auth_token";
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8000";

/// Upper bounds enforced by [`ParleyConfig::validate`].
pub const MAX_UPSTREAM_TIMEOUT_SECS: u64 = 86_400;
pub const MAX_CACHE_TTL_SECS: u64 = 86_400 * 365;
pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged. Use the accessor methods to read a
/// section with defaults filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: Option<ServerConfig>,
    pub auth: Option<AuthConfig>,
    pub limits: Option<LimitsConfig>,
    pub cache: Option<CacheSection>,
    pub upstream: Option<UpstreamConfig>,
    pub database: Option<DatabaseConfig>,
    pub logging: Option<LoggingConfig>,
}

impl ParleyConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not merged field by field.
    pub fn merge(&mut self, other: ParleyConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.auth.is_some() {
            self.auth = other.auth;
        }
        if other.limits.is_some() {
            self.limits = other.limits;
        }
        if other.cache.is_some() {
            self.cache = other.cache;
        }
        if other.upstream.is_some() {
            self.upstream = other.upstream;
        }
        if other.database.is_some() {
            self.database = other.database;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn auth(&self) -> AuthConfig {
        self.auth.clone().unwrap_or_default()
    }

    pub fn limits(&self) -> LimitsConfig {
        self.limits.clone().unwrap_or_default()
    }

    pub fn cache(&self) -> CacheSection {
        self.cache.clone().unwrap_or_default()
    }

    pub fn upstream(&self) -> UpstreamConfig {
        self.upstream.clone().unwrap_or_default()
    }

    pub fn database(&self) -> DatabaseConfig {
        self.database.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject settings the gateway cannot start with.
    pub fn validate(&self) -> crate::Result<()> {
        let upstream = self.upstream();
        if upstream.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("upstream.base_url is empty".to_string()));
        }
        if upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid("upstream.timeout_secs must be positive".to_string()));
        }
        if upstream.timeout_secs > MAX_UPSTREAM_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "upstream.timeout_secs must be at most {MAX_UPSTREAM_TIMEOUT_SECS}"
            )));
        }
        if self.cache().ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "cache.ttl_secs must be at most {MAX_CACHE_TTL_SECS}"
            )));
        }
        let token_ttl_hours = self.auth().token_ttl_hours;
        if token_ttl_hours == 0 || token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            return Err(ConfigError::Invalid(format!(
                "auth.token_ttl_hours must be between 1 and {MAX_TOKEN_TTL_HOURS}"
            )));
        }
        if self.server().max_body_size == 0 {
            return Err(ConfigError::Invalid("server.max_body_size must be positive".to_string()));
        }
        if self.auth().cookie_name.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.cookie_name is empty".to_string()));
        }
        Ok(())
    }

    /// Collect warnings about settings that work but should not ship.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.auth().session_secret.is_none() {
            warnings.push(
                "auth.session_secret is not set; a random secret will be generated and \
                 sessions will not survive a restart"
                    .to_string(),
            );
        }
        if self.upstream().jwt_secret.is_none() {
            warnings.push(
                "upstream.jwt_secret is not set; upstream requests will be rejected by a \
                 backend that verifies credentials"
                    .to_string(),
            );
        }

        let limits = self.limits();
        for (name, limit) in [("login", &limits.login), ("register", &limits.register)] {
            if limit.capacity == 0 {
                warnings.push(format!(
                    "limits.{name}.capacity is 0; every request will be rejected"
                ));
            }
            if limit.refill_per_second <= 0.0 {
                warnings.push(format!(
                    "limits.{name}.refill_per_second is not positive; tokens never come back"
                ));
            }
        }

        warnings
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Log every request with its status and duration.
    pub request_logging: bool,
    /// Apply the admission buckets to login and registration.
    pub rate_limiting: bool,
    /// Allowed CORS origins. Empty means same-origin only.
    pub cors_origins: Vec<String>,
    /// Maximum request body in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            request_logging: true,
            rate_limiting: true,
            cors_origins: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for session tokens.
    pub session_secret: Option<String>,
    pub token_ttl_hours: u64,
    pub cookie_name: String,
    /// Mark the session cookie `Secure`.
    pub secure_cookie: bool,
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours.saturating_mul(3600))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            token_ttl_hours: 24,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: false,
            bcrypt_cost: 12,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission limits
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub login: LimitConfig,
    pub register: LimitConfig,
}

/// One token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Bucket size, also the initial number of tokens.
    pub capacity: u32,
    /// Tokens restored per second, continuously.
    pub refill_per_second: f64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            refill_per_second: 100.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub sweep: SweepMode,
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_max_entries(self.max_entries)
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_sweep_mode(self.sweep)
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            max_entries: defaults.max_entries,
            ttl_secs: defaults.ttl.as_secs(),
            sweep: defaults.sweep_mode,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the generation backend.
    pub base_url: String,
    /// Shared secret for request credentials.
    pub jwt_secret: Option<String>,
    /// Per-exchange deadline.
    pub timeout_secs: u64,
    /// Forwarded to the backend with every request.
    pub recursion_limit: u32,
    /// Display name used in logs and health output.
    pub name: String,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            jwt_secret: None,
            timeout_secs: 300,
            recursion_limit: 25,
            name: "backend".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage & logging
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data dir>/parley/parley.db`.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::discovery::data_dir().join("parley.db"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rolling JSON logs. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
}
