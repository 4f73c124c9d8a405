//! SQLite-backed message storage.
//!
//! Messages are append-only; the only mutation is the bulk mark-as-seen flip
//! driven by the HTTP surface. Insertion order (the autoincrement id) is the
//! store-native order used for history and backlog queries.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

/// Longest message text accepted for persistence.
pub const MAX_MESSAGE_LEN: usize = 255;

/// Wire representation of a stored message. Sender and recipient are
/// usernames, which is how the chat protocol addresses users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub text: String,
    pub sender: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
    pub seen: bool,
}

/// Outcome of a bulk mark-as-seen request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSeenOutcome {
    /// At least one submitted id matched a stored message.
    Updated(u64),
    /// None of the submitted ids matched.
    NotModified,
}

/// Message store over the shared SQLite pool
pub struct MessageStore {
    pool: SqlitePool,
}

type MessageRow = (i64, String, String, String, String, bool);

impl MessageStore {
    /// Create new message store
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_db().await?;

        info!("[Messages] Initialized");

        Ok(store)
    }

    /// Initialize database tables
    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                seen INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (recipient_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a new message, unseen. Text must be non-empty and within the
    /// wire bound. Returns the monotonic message id.
    pub async fn create(&self, text: &str, sender_id: &str, recipient_id: &str) -> Result<i64> {
        if text.is_empty() {
            return Err(anyhow::anyhow!("Message text must not be empty"));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(anyhow::anyhow!(
                "Message text exceeds {} characters",
                MAX_MESSAGE_LEN
            ));
        }

        let result = sqlx::query(
            "INSERT INTO messages (text, sender_id, recipient_id, sent_at, seen) VALUES (?, ?, ?, ?, 0)"
        )
        .bind(text)
        .bind(sender_id)
        .bind(recipient_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All messages the user sent or received, in insertion order.
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<MessageRecord>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT m.id, m.text, s.username, r.username, m.sent_at, m.seen
            FROM messages m
            JOIN users s ON m.sender_id = s.id
            JOIN users r ON m.recipient_id = r.id
            WHERE m.sender_id = ? OR m.recipient_id = ?
            ORDER BY m.id
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    /// Unseen messages addressed to a username, in insertion order. This is
    /// the backlog snapshot source; empty is a valid result.
    pub async fn unseen_for_recipient(&self, username: &str) -> Result<Vec<MessageRecord>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT m.id, m.text, s.username, r.username, m.sent_at, m.seen
            FROM messages m
            JOIN users s ON m.sender_id = s.id
            JOIN users r ON m.recipient_id = r.id
            WHERE r.username = ? AND m.seen = 0
            ORDER BY m.id
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    /// Flip the submitted message ids to seen. Ids that match nothing are
    /// ignored; when none match the outcome is `NotModified`.
    pub async fn mark_seen(&self, ids: &[i64]) -> Result<MarkSeenOutcome> {
        let mut updated = 0u64;
        for id in ids {
            let result = sqlx::query("UPDATE messages SET seen = 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            updated += result.rows_affected();
        }

        if updated == 0 {
            return Ok(MarkSeenOutcome::NotModified);
        }

        info!("[Messages] Marked {} messages as seen", updated);

        Ok(MarkSeenOutcome::Updated(updated))
    }
}

fn row_to_record((id, text, sender, recipient, sent_at, seen): MessageRow) -> MessageRecord {
    MessageRecord {
        id,
        text,
        sender,
        recipient,
        sent_at: sent_at.parse().unwrap_or_else(|_| Utc::now()),
        seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn test_pool(dir: &TempDir) -> SqlitePool {
        let url = format!("sqlite:{}", dir.path().join("test.sqlite").display());
        let options = SqliteConnectOptions::from_str(&url)
            .unwrap()
            .create_if_missing(true);
        SqlitePoolOptions::new().connect_with(options).await.unwrap()
    }

    async fn insert_user(pool: &SqlitePool, id: &str, username: &str) {
        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash, created_at, is_active) VALUES (?, ?, ?, 'x', ?, 1)"
        )
        .bind(id)
        .bind(format!("{}@example.com", username))
        .bind(username)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn setup(dir: &TempDir) -> (SqlitePool, MessageStore) {
        let pool = test_pool(dir).await;
        // AuthManager owns the users table schema
        AuthManager::new(pool.clone()).await.unwrap();
        let store = MessageStore::new(pool.clone()).await.unwrap();
        (pool, store)
    }

    #[tokio::test]
    async fn test_create_and_list_for_user() {
        let dir = TempDir::new().unwrap();
        let (pool, store) = setup(&dir).await;
        insert_user(&pool, "u1", "alice").await;
        insert_user(&pool, "u2", "bob").await;

        let id = store.create("hello bob", "u1", "u2").await.unwrap();
        assert!(id > 0);

        let for_alice = store.for_user("u1").await.unwrap();
        let for_bob = store.for_user("u2").await.unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_bob.len(), 1);
        assert_eq!(for_bob[0].text, "hello bob");
        assert_eq!(for_bob[0].sender, "alice");
        assert_eq!(for_bob[0].recipient, "bob");
        assert!(!for_bob[0].seen);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_text() {
        let dir = TempDir::new().unwrap();
        let (pool, store) = setup(&dir).await;
        insert_user(&pool, "u1", "alice").await;
        insert_user(&pool, "u2", "bob").await;

        assert!(store.create("", "u1", "u2").await.is_err());
        let too_long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(store.create(&too_long, "u1", "u2").await.is_err());
    }

    #[tokio::test]
    async fn test_unseen_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let (pool, store) = setup(&dir).await;
        insert_user(&pool, "u1", "alice").await;
        insert_user(&pool, "u2", "bob").await;

        let first = store.create("first", "u1", "u2").await.unwrap();
        let second = store.create("second", "u1", "u2").await.unwrap();

        let unseen = store.unseen_for_recipient("bob").await.unwrap();
        assert_eq!(unseen.len(), 2);
        assert_eq!(unseen[0].id, first);
        assert_eq!(unseen[1].id, second);
    }

    #[tokio::test]
    async fn test_mark_seen_isolates_messages() {
        let dir = TempDir::new().unwrap();
        let (pool, store) = setup(&dir).await;
        insert_user(&pool, "u1", "alice").await;
        insert_user(&pool, "u2", "bob").await;

        let first = store.create("first", "u1", "u2").await.unwrap();
        let second = store.create("second", "u1", "u2").await.unwrap();

        let outcome = store.mark_seen(&[first]).await.unwrap();
        assert_eq!(outcome, MarkSeenOutcome::Updated(1));

        let unseen = store.unseen_for_recipient("bob").await.unwrap();
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].id, second);
    }

    #[tokio::test]
    async fn test_mark_seen_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let (pool, store) = setup(&dir).await;
        insert_user(&pool, "u1", "alice").await;
        insert_user(&pool, "u2", "bob").await;

        // Nothing stored matches
        let outcome = store.mark_seen(&[42, 43]).await.unwrap();
        assert_eq!(outcome, MarkSeenOutcome::NotModified);

        // Unknown ids are ignored alongside a real one
        let id = store.create("hi", "u1", "u2").await.unwrap();
        let outcome = store.mark_seen(&[id, 999]).await.unwrap();
        assert_eq!(outcome, MarkSeenOutcome::Updated(1));
    }
}
