//! HTTP server bootstrap.
//!
//! Wires together configuration, the auth store pool (WAL mode), the core
//! components, the router and the two background workers, and runs until a
//! shutdown signal arrives. Shutdown ordering: stop accepting requests,
//! signal the workers, join them (the usage writer flushes and drains first).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::auth::{OauthBroker, ProviderCredentials};
use crate::infra::{
    FeatureRegistry, IdentityStore, OauthStateStore, QuotaEngine, SessionStore, TokenStore,
    UsageTracker, DEFAULT_SESSION_DURATION_SECS,
};

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub auth_database_path: String,
    pub max_connections: u32,
    pub google: ProviderCredentials,
    pub github: ProviderCredentials,
    pub callback_base_url: String,
    /// Reserved for cookie-value signing; sessions are server-side today.
    pub session_secret: Option<String>,
    pub session_duration: chrono::Duration,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(9237);
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("Invalid listen address");

        let auth_database_path = std::env::var("AUTH_DATABASE_PATH")
            .unwrap_or_else(|_| "./data/auth.db".to_string());

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let provider = |id_key: &str, secret_key: &str| ProviderCredentials {
            client_id: std::env::var(id_key).unwrap_or_default(),
            client_secret: std::env::var(secret_key).unwrap_or_default(),
        };

        let session_duration = std::env::var("SESSION_DURATION")
            .ok()
            .and_then(|v| parse_duration(&v))
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_SESSION_DURATION_SECS));

        let secure_cookies = std::env::var("SECURE_COOKIES")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on"))
            .unwrap_or(false);

        Self {
            listen_addr,
            auth_database_path,
            max_connections,
            google: provider("GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"),
            github: provider("GITHUB_CLIENT_ID", "GITHUB_CLIENT_SECRET"),
            callback_base_url: std::env::var("AUTH_CALLBACK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9237".to_string()),
            session_secret: std::env::var("SESSION_SECRET").ok(),
            session_duration,
            secure_cookies,
        }
    }
}

/// Parses duration strings like `45s`, `30m`, `168h`, `7d`, or bare seconds.
pub fn parse_duration(value: &str) -> Option<chrono::Duration> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let number: i64 = number.parse().ok()?;

    match unit {
        "s" => Some(chrono::Duration::seconds(number)),
        "m" => Some(chrono::Duration::minutes(number)),
        "h" => Some(chrono::Duration::hours(number)),
        "d" => Some(chrono::Duration::days(number)),
        _ => None,
    }
}

/// Application state shared across handlers and guards. Every component
/// clones cheaply around the shared pool.
#[derive(Clone)]
pub struct AppState {
    pub identity: IdentityStore,
    pub features: FeatureRegistry,
    pub sessions: SessionStore,
    pub states: OauthStateStore,
    pub tokens: TokenStore,
    pub quota: QuotaEngine,
    pub usage: Arc<UsageTracker>,
    pub oauth: Arc<OauthBroker>,
}

impl AppState {
    /// Builds the component graph over an open, migrated pool.
    pub fn build(pool: SqlitePool, config: &Config) -> Self {
        let identity = IdentityStore::new(pool.clone());
        let features = FeatureRegistry::new(pool.clone());
        let sessions = SessionStore::new(
            pool.clone(),
            identity.clone(),
            config.session_duration,
            config.secure_cookies,
        );
        let states = OauthStateStore::new(pool.clone());
        let tokens = TokenStore::new(pool.clone(), identity.clone(), features.clone());
        let quota = QuotaEngine::new(pool.clone(), identity.clone(), features.clone());
        let usage = UsageTracker::new(pool, sessions.clone(), states.clone());
        let oauth = Arc::new(OauthBroker::new(
            config.google.clone(),
            config.github.clone(),
            &config.callback_base_url,
        ));

        Self {
            identity,
            features,
            sessions,
            states,
            tokens,
            quota,
            usage,
            oauth,
        }
    }
}

/// Start the HTTP server and run until shutdown.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting osduth-gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Auth database: {}", config.auth_database_path);
    info!("  Session duration: {}", config.session_duration);
    if config.session_secret.is_none() {
        warn!("SESSION_SECRET is not set");
    }
    for (provider, creds) in [("google", &config.google), ("github", &config.github)] {
        if creds.client_id.is_empty() {
            warn!("OAuth provider {provider} is not configured");
        }
    }

    if let Some(parent) = std::path::Path::new(&config.auth_database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL keeps readers unblocked while the usage writer flushes.
    let connect = SqliteConnectOptions::new()
        .filename(&config.auth_database_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connect)
        .await?;
    info!("Auth store opened");

    crate::migrations::run(&pool).await?;
    info!("Migrations applied");

    let state = AppState::build(pool, &config);

    // Background workers stop on the shutdown watch.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = state.usage.start(shutdown_rx);

    let app = build_router(state);

    info!("Listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Requests have drained; now stop the workers. The usage writer flushes
    // its batch and empties the channel before returning.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker join failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Router with the API nested under `/api`, plus the health probe.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .nest("/api", crate::api::router(state))
        .route("/health", get(crate::api::handlers::health::health_check))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer_from_env() {
        router = router.layer(cors);
    }
    router
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn cors_layer_from_env() -> Option<CorsLayer> {
    let origins = std::env::var("CORS_ALLOW_ORIGINS").ok()?;
    let origins = origins.trim();
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_credentials(origins != "*")
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
