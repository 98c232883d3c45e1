//! Application state shared across handlers.

use std::sync::Arc;

use parley_cache::{BoundedCache, CacheConfig};
use parley_store::{ConversationStore, User};
use parley_upstream::SharedProvider;

use crate::auth::SessionKeys;
use crate::config::ServerConfig;
use crate::ratelimit::AdmissionLimiter;
use crate::relay::ActiveRelays;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    pub store: Arc<ConversationStore>,

    /// Generation backend.
    pub provider: SharedProvider,

    /// Identity records by username, in front of the store.
    pub identities: BoundedCache<User>,

    pub sessions: Arc<SessionKeys>,

    /// Admission bucket for `POST /auth/login`.
    pub login_limiter: Arc<AdmissionLimiter>,

    /// Admission bucket for `POST /auth/register`.
    pub register_limiter: Arc<AdmissionLimiter>,

    /// Streams in flight, by conversation.
    pub relays: Arc<ActiveRelays>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Session keys start random and the identity cache uses defaults; see
    /// [`with_session_keys`](Self::with_session_keys) and
    /// [`with_identity_cache`](Self::with_identity_cache).
    pub fn new(config: ServerConfig, store: ConversationStore, provider: SharedProvider) -> Self {
        let sessions = SessionKeys::random(config.token_ttl);
        let login_limiter = AdmissionLimiter::from_config(&config.login_limit);
        let register_limiter = AdmissionLimiter::from_config(&config.register_limit);

        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            provider,
            identities: BoundedCache::new(CacheConfig::default()),
            sessions: Arc::new(sessions),
            login_limiter: Arc::new(login_limiter),
            register_limiter: Arc::new(register_limiter),
            relays: Arc::new(ActiveRelays::new()),
        }
    }

    pub fn with_session_keys(mut self, keys: SessionKeys) -> Self {
        self.sessions = Arc::new(keys);
        self
    }

    pub fn with_identity_cache(mut self, config: CacheConfig) -> Self {
        self.identities = BoundedCache::new(config);
        self
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// State over an in-memory store and a scripted provider.
#[cfg(test)]
pub(crate) fn test_state() -> (AppState, Arc<parley_upstream::MockProvider>) {
    test_state_with(ServerConfig::default().with_bcrypt_cost(4))
}

#[cfg(test)]
pub(crate) fn test_state_with(
    config: ServerConfig,
) -> (AppState, Arc<parley_upstream::MockProvider>) {
    let provider = Arc::new(parley_upstream::MockProvider::new());
    let store = ConversationStore::open_in_memory().unwrap();
    let state = AppState::new(config, store, provider.clone())
        .with_session_keys(SessionKeys::new("test-secret", std::time::Duration::from_secs(3600)));
    (state, provider)
}
