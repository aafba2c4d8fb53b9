//! SQLite connection and schema bootstrap.

use crate::error::{Result, StorageError};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS group_messages (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        is_bot_reply INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_group_messages_group
        ON group_messages (group_id, created_at)",
    "CREATE TABLE IF NOT EXISTS archived_threads (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        preference_key TEXT NOT NULL,
        summary TEXT,
        created_at TIMESTAMP NOT NULL,
        last_activity_at TIMESTAMP NOT NULL,
        archived_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS archived_thread_messages (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        is_bot_reply INTEGER NOT NULL DEFAULT 0,
        is_summary INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_archived_thread_messages_thread
        ON archived_thread_messages (thread_id, created_at)",
];

/// Database handle.
#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) the SQLite database under the data
    /// directory and bootstrap the schema.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("chime.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(StorageError::Sqlx)?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(StorageError::Sqlx)?;
        }
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
