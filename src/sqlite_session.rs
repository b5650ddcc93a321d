//! SQLite-backed sessions.
//!
//! A conversation stored here survives process restarts. Each item is one
//! JSON row with a per-session position, and reads return rows in position
//! order.
//!
//! ```rust,no_run
//! use tower_agents::items::ConversationItem;
//! use tower_agents::memory::Session;
//! use tower_agents::sqlite_session::SqliteSession;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SqliteSession::new("user_123", "conversations.db").await?;
//! session.clear_session().await?;
//! session.add_items(vec![ConversationItem::user("Hello, persistent world!")]).await?;
//!
//! let items = session.get_items(None).await?;
//! assert_eq!(items[0].text().as_deref(), Some("Hello, persistent world!"));
//! # Ok(())
//! # }
//! ```
//!
//! [`Session`]: crate::memory::Session

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::items::ConversationItem;
use crate::memory::Session;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS conversation_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        stored_at TEXT NOT NULL,
        UNIQUE(session_id, position)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_session ON conversation_items(session_id, position)",
];

/// [`Session`] stored in a SQLite database file.
///
/// Several sessions can share one file; rows are keyed by session id.
pub struct SqliteSession {
    session_id: String,
    pool: Pool<Sqlite>,
}

impl SqliteSession {
    /// Opens (or creates) the database at `db_path` and prepares the schema.
    pub async fn new(session_id: impl Into<String>, db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(session_id, pool).await
    }

    /// Session in `sessions.db` under the working directory.
    pub async fn new_default(session_id: impl Into<String>) -> Result<Self> {
        Self::new(session_id, "sessions.db").await
    }

    /// Session in a private in-memory database; lost when dropped.
    pub async fn new_in_memory(session_id: impl Into<String>) -> Result<Self> {
        // Every connection to ":memory:" opens its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(session_id, pool).await
    }

    async fn with_pool(session_id: impl Into<String>, pool: Pool<Sqlite>) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self {
            session_id: session_id.into(),
            pool,
        })
    }

    /// Number of items stored for this session.
    pub async fn len(&self) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_items WHERE session_id = ?")
                .bind(&self.session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

fn decode(payload: &str) -> Result<ConversationItem> {
    Ok(serde_json::from_str(payload)?)
}

#[async_trait]
impl Session for SqliteSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<ConversationItem>> {
        // The newest `limit` rows, returned oldest first. -1 means no limit in SQLite.
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let payloads: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM (
                SELECT payload, position FROM conversation_items
                WHERE session_id = ?
                ORDER BY position DESC
                LIMIT ?
            )
            ORDER BY position ASC
            "#,
        )
        .bind(&self.session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        payloads.iter().map(|p| decode(p)).collect()
    }

    async fn add_items(&self, items: Vec<ConversationItem>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        let last: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(position) FROM conversation_items WHERE session_id = ?",
        )
        .bind(&self.session_id)
        .fetch_one(&mut *tx)
        .await?;
        let first = last.map(|p| p + 1).unwrap_or(0);
        let stored_at = Utc::now().to_rfc3339();

        for (offset, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_items (session_id, position, kind, payload, stored_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&self.session_id)
            .bind(first + offset as i64)
            .bind(item.kind())
            .bind(serde_json::to_string(item)?)
            .bind(&stored_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(session_id = %self.session_id, count = items.len(), "Stored session items");
        Ok(())
    }

    async fn pop_item(&self) -> Result<Option<ConversationItem>> {
        let mut tx = self.pool.begin().await?;
        let newest = sqlx::query(
            "SELECT id, payload FROM conversation_items WHERE session_id = ? \
             ORDER BY position DESC LIMIT 1",
        )
        .bind(&self.session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = newest else {
            return Ok(None);
        };
        let id: i64 = row.get("id");
        let payload: String = row.get("payload");
        sqlx::query("DELETE FROM conversation_items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        decode(&payload).map(Some)
    }

    async fn clear_session(&self) -> Result<()> {
        let removed = sqlx::query("DELETE FROM conversation_items WHERE session_id = ?")
            .bind(&self.session_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(session_id = %self.session_id, removed, "Cleared session");
        Ok(())
    }
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("session_id", &self.session_id)
            .finish()
    }
}
