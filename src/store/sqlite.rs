//! SQLite session store
//!
//! Persistent key-value storage for session blobs using SQLite, the
//! file-backed counterpart of the in-memory store.

use super::*;
use crate::AuthFlowError;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// SQLite-backed session store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a session database
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g. "~/.authflow/sessions.db" or
    ///   ":memory:" for an in-memory database)
    pub async fn new(dsn: &str) -> Result<Self> {
        // Prepend sqlite: prefix if not present and add create-if-missing option
        let connection_string = if dsn.starts_with("sqlite:") {
            if dsn.contains('?') {
                dsn.to_string()
            } else {
                format!("{}?mode=rwc", dsn)
            }
        } else {
            format!("sqlite:{}?mode=rwc", dsn)
        };

        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);

        // Reject path traversal in configured DSNs
        if file_path.contains("..") {
            return Err(AuthFlowError::config(
                "Database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        if file_path != ":memory:"
            && let Some(parent) = Path::new(file_path).parent()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect(&connection_string)
            .await
            .map_err(|e| AuthFlowError::storage(format!("Failed to connect to SQLite: {e}")))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT PRIMARY KEY,
                blob TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, user_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT blob FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<String, _>("blob").map_err(Into::into))
            .transpose()
    }

    async fn set(&self, user_id: &str, blob: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, blob, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT user_id FROM sessions ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get::<String, _>("user_id").map_err(Into::into))
            .collect()
    }
}
