//! History collaborator contract and text rendering helpers.

use crate::GroupId;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recently stored group message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessage {
    pub user_id: i64,
    pub content: String,
    pub is_bot_reply: bool,
    pub created_at: DateTime<Utc>,
}

/// Supplies recent messages from the group message store.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Recent messages for a group, oldest first.
    async fn recent_messages(&self, group_id: &GroupId, limit: usize)
    -> Result<Vec<RecentMessage>>;
}

/// Render recent messages as ordered lines.
pub fn render_recent(messages: &[RecentMessage]) -> String {
    messages.iter().map(render_line).collect::<Vec<_>>().join("\n")
}

/// Render recent messages with `[i]` prefixes for index-addressable
/// analysis output.
pub fn render_recent_indexed(messages: &[RecentMessage]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, message)| format!("[{i}] {}", render_line(message)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(message: &RecentMessage) -> String {
    if message.is_bot_reply {
        format!("Bot: {}", message.content)
    } else {
        format!("User {}: {}", message.user_id, message.content)
    }
}
