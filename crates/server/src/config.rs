//! Chat server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::blocks::BlockRegistry;
use crate::router::GroupRouter;
use crate::store::MessageStore;

/// Configuration for the marketplace chat server.
#[derive(Clone, Debug)]
pub struct ChatServerConfig {
    /// Data directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Capacity of each per-user broadcast channel
    pub group_capacity: usize,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("chat_data"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            group_capacity: 100,
        }
    }
}

impl ChatServerConfig {
    /// Create config rooted at a custom data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("marketplace.sqlite")
    }

    /// Ensure the data directory exists.
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers and chat sessions
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub messages: Arc<MessageStore>,
    pub blocks: Arc<BlockRegistry>,
    pub router: Arc<GroupRouter>,
}
