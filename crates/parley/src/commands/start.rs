//! Start command - launches the Parley gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::signal;

use parley_config::{self, LoadedConfig, ParleyConfig};
use parley_server::{AppState, Server, ServerConfig, SessionKeys};
use parley_store::ConversationStore;
use parley_upstream::{HttpProvider, HttpProviderConfig, SharedProvider, UpstreamSigner};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Generation backend base URL (overrides config)
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Secret for signing session tokens (or set PARLEY_SESSION_SECRET)
    #[arg(long, env = "PARLEY_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Secret shared with the backend (or set PARLEY_UPSTREAM_SECRET)
    #[arg(long, env = "PARLEY_UPSTREAM_SECRET", hide_env_values = true)]
    pub upstream_secret: Option<String>,

    /// Disable admission limits on login and registration
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Path to config file (overrides default discovery)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    // ── Load configuration ──────────────────────────────────────────────

    let loaded: LoadedConfig = match args.config {
        Some(ref path) => parley_config::load_single(path)?,
        None => parley_config::load_config(None)?,
    };

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    if loaded.loaded_from.is_empty() {
        println!("No config files found, using defaults + CLI args");
    } else {
        for source in &loaded.loaded_from {
            println!("Loaded config: {}", source.display());
        }
    }

    let mut config = loaded.config;
    apply_overrides(&mut config, &args);
    config.validate()?;

    // ── Storage ─────────────────────────────────────────────────────────

    let db_path = config.database().resolved_path();
    let store = ConversationStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    if ctx.verbose {
        println!("Database: {}", db_path.display());
    }

    // ── Backend ─────────────────────────────────────────────────────────

    let upstream = config.upstream();
    let mut provider_config =
        HttpProviderConfig::new(&upstream.base_url).with_name(&upstream.name);
    if let Some(ref secret) = upstream.jwt_secret {
        provider_config = provider_config.with_signer(UpstreamSigner::new(secret));
    }
    let provider: SharedProvider = Arc::new(HttpProvider::new(provider_config)?);
    println!("Backend: {} ({})", upstream.name, upstream.base_url);

    // ── Server ──────────────────────────────────────────────────────────

    let server_config = ServerConfig::from_config(&config);
    let addr = resolve_addr(&config)?;
    let server_config = server_config.with_bind_address(addr);
    let token_ttl = server_config.token_ttl;

    let mut app_state = AppState::new(server_config, store, provider)
        .with_identity_cache(config.cache().to_cache_config());
    if let Some(ref secret) = config.auth().session_secret {
        app_state = app_state.with_session_keys(SessionKeys::new(secret, token_ttl));
    }

    let sweeper = app_state.identities.spawn_sweeper();

    let server = Server::from_state(app_state);

    println!("Parley gateway starting on http://{}", addr);
    println!("Press Ctrl+C to stop");

    let result = server.run_on(addr, shutdown_signal()).await;

    // ── Graceful shutdown ──────────────────────────────────────────────

    sweeper.shutdown().await;
    if ctx.verbose {
        println!("Cache sweeper stopped");
    }

    result?;
    Ok(())
}

/// Fold CLI overrides into the loaded config.
fn apply_overrides(config: &mut ParleyConfig, args: &StartArgs) {
    let mut server = config.server();
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(ref bind) = args.bind {
        server.bind = bind.clone();
    }
    if args.no_rate_limit {
        server.rate_limiting = false;
    }
    config.server = Some(server);

    if let Some(ref secret) = args.session_secret {
        let mut auth = config.auth();
        auth.session_secret = Some(secret.clone());
        config.auth = Some(auth);
    }

    let mut upstream = config.upstream();
    if let Some(ref url) = args.upstream_url {
        upstream.base_url = url.clone();
    }
    if let Some(ref secret) = args.upstream_secret {
        upstream.jwt_secret = Some(secret.clone());
    }
    config.upstream = Some(upstream);

    if let Some(ref path) = args.database {
        let mut database = config.database();
        database.path = Some(path.clone());
        config.database = Some(database);
    }
}

fn resolve_addr(config: &ParleyConfig) -> Result<SocketAddr> {
    let server = config.server();
    format!("{}:{}", server.bind, server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", server.bind, server.port))
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
