//! Block Registry
//!
//! Directional block records between user pairs, stored in the shared SQLite
//! database. A pair counts as blocked for messaging when a record exists in
//! either direction; removal only lifts the exact directional record.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// Outcome of a block creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Created,
    /// A record already exists in either direction for the pair.
    AlreadyBlocked,
}

/// Outcome of an unblock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnblockOutcome {
    Removed,
    /// No record with this exact initiator and target exists.
    NotFound,
}

/// Block registry over the shared SQLite pool
pub struct BlockRegistry {
    pool: SqlitePool,
}

impl BlockRegistry {
    /// Create new block registry
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let registry = Self { pool };
        registry.init_db().await?;

        info!("[Blocks] Initialized");

        Ok(registry)
    }

    /// Initialize database tables
    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                id TEXT PRIMARY KEY,
                initiator_id TEXT NOT NULL,
                blocked_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (initiator_id) REFERENCES users(id),
                FOREIGN KEY (blocked_id) REFERENCES users(id),
                UNIQUE(initiator_id, blocked_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// True when a block exists in either direction between the two users.
    /// Evaluated fresh on every call; nothing is cached.
    pub async fn is_blocked(&self, a: &str, b: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM blocks WHERE
             (initiator_id = ? AND blocked_id = ?) OR
             (initiator_id = ? AND blocked_id = ?)",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Create a directional block. No-op when the pair is already blocked in
    /// either direction.
    pub async fn create(&self, initiator_id: &str, blocked_id: &str) -> Result<BlockOutcome> {
        if self.is_blocked(initiator_id, blocked_id).await? {
            return Ok(BlockOutcome::AlreadyBlocked);
        }

        sqlx::query(
            "INSERT INTO blocks (id, initiator_id, blocked_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(initiator_id)
        .bind(blocked_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("[Blocks] {} blocked {}", initiator_id, blocked_id);

        Ok(BlockOutcome::Created)
    }

    /// Remove the exact initiator-to-blocked record. Strictly directional:
    /// the reverse record, if any, is untouched.
    pub async fn remove(&self, initiator_id: &str, blocked_id: &str) -> Result<UnblockOutcome> {
        let result = sqlx::query("DELETE FROM blocks WHERE initiator_id = ? AND blocked_id = ?")
            .bind(initiator_id)
            .bind(blocked_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(UnblockOutcome::NotFound);
        }

        info!("[Blocks] {} unblocked {}", initiator_id, blocked_id);

        Ok(UnblockOutcome::Removed)
    }
}
