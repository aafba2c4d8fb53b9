//! Ended-thread persistence and the SQLite-backed history store.

use crate::GroupId;
use crate::error::{Result, StorageError};
use crate::history::{HistoryProvider, RecentMessage};
use crate::proactive::thread::ProactiveThread;
use async_trait::async_trait;
use sqlx::{Row as _, SqlitePool};

/// Persists ended threads. Called before the thread is removed from the
/// store.
#[async_trait]
pub trait ThreadArchiver: Send + Sync {
    async fn save_ended_thread(
        &self,
        thread: &ProactiveThread,
        summary: Option<&str>,
    ) -> Result<()>;
}

/// SQLite-backed archiver.
#[derive(Debug, Clone)]
pub struct SqliteThreadArchiver {
    pool: SqlitePool,
}

impl SqliteThreadArchiver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreadArchiver for SqliteThreadArchiver {
    async fn save_ended_thread(
        &self,
        thread: &ProactiveThread,
        summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO archived_threads (id, group_id, preference_key, summary, created_at, last_activity_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(thread.id.to_string())
        .bind(thread.group_id.as_ref())
        .bind(&thread.preference_key)
        .bind(summary)
        .bind(thread.created_at)
        .bind(thread.last_activity_at)
        .execute(&self.pool)
        .await
        .map_err(|source| StorageError::Archive {
            thread_id: thread.id,
            source,
        })?;

        for message in &thread.messages {
            sqlx::query(
                "INSERT INTO archived_thread_messages (id, thread_id, user_id, content, is_bot_reply, is_summary, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(thread.id.to_string())
            .bind(message.user_id)
            .bind(&message.content)
            .bind(message.is_bot_reply)
            .bind(message.is_summary)
            .bind(message.created_at)
            .execute(&self.pool)
            .await
            .map_err(|source| StorageError::Archive {
                thread_id: thread.id,
                source,
            })?;
        }

        tracing::debug!(thread_id = %thread.id, messages = thread.messages.len(), "thread archived");
        Ok(())
    }
}

/// SQLite-backed group message history.
///
/// Writes are fire-and-forget so the pipeline never blocks on a DB write;
/// reads select newest-first then reverse to chronological order.
#[derive(Debug, Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a group message. Fire-and-forget.
    pub fn record(&self, group_id: &GroupId, user_id: i64, content: &str, is_bot_reply: bool) {
        let pool = self.pool.clone();
        let id = uuid::Uuid::new_v4().to_string();
        let group_id = group_id.to_string();
        let content = content.to_string();

        tokio::spawn(async move {
            if let Err(error) = sqlx::query(
                "INSERT INTO group_messages (id, group_id, user_id, content, is_bot_reply) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&group_id)
            .bind(user_id)
            .bind(&content)
            .bind(is_bot_reply)
            .execute(&pool)
            .await
            {
                tracing::warn!(%error, "failed to persist group message");
            }
        });
    }
}

#[async_trait]
impl HistoryProvider for SqliteHistory {
    async fn recent_messages(
        &self,
        group_id: &GroupId,
        limit: usize,
    ) -> Result<Vec<RecentMessage>> {
        let rows = sqlx::query(
            "SELECT user_id, content, is_bot_reply, created_at FROM group_messages \
             WHERE group_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(group_id.as_ref())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;

        let mut messages: Vec<RecentMessage> = rows
            .into_iter()
            .map(|row| RecentMessage {
                user_id: row.try_get("user_id").unwrap_or_default(),
                content: row.try_get("content").unwrap_or_default(),
                is_bot_reply: row.try_get("is_bot_reply").unwrap_or_default(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect();

        // Reverse to chronological order
        messages.reverse();

        Ok(messages)
    }
}
