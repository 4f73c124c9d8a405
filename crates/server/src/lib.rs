//! Marketplace Chat Server Library
//!
//! Realtime personal messaging for the marketplace: WebSocket chat sessions
//! with per-user broadcast groups, block enforcement, and unseen-message
//! backlog delivery over SQLite storage.

pub mod auth;
pub mod blocks;
pub mod chat;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod store;

use std::path::PathBuf;
use std::str::FromStr;

use axum::routing::{get, post};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use auth::AuthManager;
use blocks::BlockRegistry;
use chat::ws_chat;
use config::{AppState, ChatServerConfig};
use handlers::{
    block_user, list_messages, list_users, login, logout, mark_seen, me, signup, unblock_user,
};
use router::GroupRouter;
use store::MessageStore;

/// Open the SQLite pool for a config, creating the database if needed.
pub async fn open_pool(config: &ChatServerConfig) -> anyhow::Result<SqlitePool> {
    let url = format!("sqlite:{}", config.db_path().display());
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}

/// Build the application state: storage managers and the group router.
pub async fn build_state(config: &ChatServerConfig) -> anyhow::Result<AppState> {
    config.ensure_dirs().await?;
    let pool = open_pool(config).await?;

    let auth = Arc::new(AuthManager::new(pool.clone()).await?);
    let messages = Arc::new(MessageStore::new(pool.clone()).await?);
    let blocks = Arc::new(BlockRegistry::new(pool).await?);
    let router = GroupRouter::new(config.group_capacity);

    Ok(AppState {
        auth,
        messages,
        blocks,
        router,
    })
}

/// Build the axum router over an app state.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Auth endpoints
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/users", get(list_users))
        // Chat HTTP surface
        .route("/messages", get(list_messages))
        .route("/messages/mark", post(mark_seen))
        .route("/users/{username}/block", post(block_user).delete(unblock_user))
        // Realtime chat
        .route("/ws/chat", get(ws_chat))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Marketplace Chat Server ===");
    info!("Features: Auth | Personal Messaging | Blocks | Unseen Backlog");

    // Get CHAT_ROOT from environment or default
    let data_dir = std::env::var("CHAT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("chat_data"));
    let config = ChatServerConfig::with_data_dir(data_dir);

    info!("Data directory: {:?}", config.data_dir);
    info!("Database: {:?}", config.db_path());

    let state = build_state(&config).await?;
    let service = app(state);

    info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, service).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK - Marketplace Chat Server"
}
