//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use parley_config::{DEFAULT_COOKIE_NAME, DEFAULT_MAX_BODY_SIZE, LimitConfig, ParleyConfig};

/// Default exchange deadline with the backend (5 minutes).
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Default session token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Apply admission buckets to login and registration.
    pub rate_limiting: bool,

    /// Enable request logging.
    pub request_logging: bool,

    /// CORS allowed origins (empty = no CORS).
    pub cors_origins: Vec<String>,

    /// Maximum REST request body size in bytes.
    pub max_body_size: usize,

    /// Cookie carrying the session token.
    pub cookie_name: String,

    /// Mark the session cookie `Secure`.
    pub secure_cookie: bool,

    pub token_ttl: Duration,

    pub bcrypt_cost: u32,

    pub login_limit: LimitConfig,

    pub register_limit: LimitConfig,

    /// Deadline for each exchange with the backend.
    pub upstream_timeout: Duration,

    /// Forwarded to the backend with every chat request.
    pub recursion_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            rate_limiting: true,
            request_logging: true,
            cors_origins: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: false,
            token_ttl: DEFAULT_TOKEN_TTL,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            login_limit: LimitConfig::default(),
            register_limit: LimitConfig::default(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            recursion_limit: 25,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the loaded configuration file.
    ///
    /// An unparseable bind address falls back to localhost.
    pub fn from_config(config: &ParleyConfig) -> Self {
        let server = config.server();
        let auth = config.auth();
        let limits = config.limits();
        let upstream = config.upstream();

        let ip = server
            .bind
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        Self {
            bind_address: SocketAddr::new(ip, server.port),
            rate_limiting: server.rate_limiting,
            request_logging: server.request_logging,
            cors_origins: server.cors_origins,
            max_body_size: server.max_body_size,
            cookie_name: auth.cookie_name.clone(),
            secure_cookie: auth.secure_cookie,
            token_ttl: auth.token_ttl(),
            bcrypt_cost: auth.bcrypt_cost,
            login_limit: limits.login,
            register_limit: limits.register,
            upstream_timeout: upstream.timeout(),
            recursion_limit: upstream.recursion_limit,
        }
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Enable or disable the admission buckets.
    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.rate_limiting = enabled;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Set CORS allowed origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn with_login_limit(mut self, limit: LimitConfig) -> Self {
        self.login_limit = limit;
        self
    }

    pub fn with_register_limit(mut self, limit: LimitConfig) -> Self {
        self.register_limit = limit;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }
}
