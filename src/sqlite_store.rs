//! SQLite-backed [`BlobStore`].
//!
//! One `blobs` table keyed by `(user_id, key)` holds the manifest and
//! index blobs for every user sharing the database file. The connection
//! uses WAL journal mode and creates the file (and parent directories)
//! on first use.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::store::BlobStore;

/// Open (or create) the blob database at `path` and ensure the schema.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blobs (
            user_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, key)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

/// Blob store view scoped to a single user within a shared pool.
#[derive(Clone)]
pub struct SqliteBlobStore {
    pool: SqlitePool,
    user_id: String,
}

impl SqliteBlobStore {
    pub fn new(pool: SqlitePool, user_id: impl Into<String>) -> Self {
        Self {
            pool,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn save_blob(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO blobs (user_id, key, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.user_id)
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_blob(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM blobs WHERE user_id = ? AND key = ?")
                .bind(&self.user_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn remove_blob(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM blobs WHERE user_id = ? AND key = ?")
            .bind(&self.user_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
