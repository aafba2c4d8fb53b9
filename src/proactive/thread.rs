//! Thread data model and context rendering.

use crate::history::RecentMessage;
use crate::{BOT_USER_ID, GroupId, ThreadId};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Matches content that is nothing but bracketed media markers, e.g.
/// "[Image: cat.jpg]" or "[Voice] [Image: a.png]".
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\[[^\[\]]*\]\s*)+$").expect("valid regex"));

/// Whether the content carries actual conversational text.
pub(crate) fn is_substantive(content: &str) -> bool {
    let trimmed = content.trim();
    !trimmed.is_empty() && !PLACEHOLDER.is_match(trimmed)
}

/// One entry in a proactive thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Sender id; 0 is reserved for the bot.
    pub user_id: i64,
    pub content: String,
    pub is_bot_reply: bool,
    pub created_at: DateTime<Utc>,
    /// Content is a compaction of earlier messages, not a literal utterance.
    #[serde(default)]
    pub is_summary: bool,
    /// Already handled by the direct-reply path; informational for analysis.
    #[serde(default)]
    pub was_at_bot: bool,
}

impl ThreadMessage {
    pub fn user(user_id: i64, content: impl Into<String>) -> Self {
        Self {
            user_id,
            content: content.into(),
            is_bot_reply: false,
            created_at: Utc::now(),
            is_summary: false,
            was_at_bot: false,
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            user_id: BOT_USER_ID,
            content: content.into(),
            is_bot_reply: true,
            created_at: Utc::now(),
            is_summary: false,
            was_at_bot: false,
        }
    }

    /// Synthetic entry standing in for a replaced message prefix. Its
    /// `created_at` is the replacement time, not the original range.
    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            user_id: BOT_USER_ID,
            content: content.into(),
            is_bot_reply: false,
            created_at: Utc::now(),
            is_summary: true,
            was_at_bot: false,
        }
    }

    pub fn from_recent(entry: &RecentMessage) -> Self {
        Self {
            user_id: entry.user_id,
            content: entry.content.clone(),
            is_bot_reply: entry.is_bot_reply,
            created_at: entry.created_at,
            is_summary: false,
            was_at_bot: false,
        }
    }
}

/// A bounded, in-memory record of one ongoing topical exchange in a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveThread {
    pub id: ThreadId,
    pub group_id: GroupId,
    /// Persona/config selector used to render prompts for this thread.
    pub preference_key: String,
    /// Strictly time-ordered entries.
    pub messages: Vec<ThreadMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ProactiveThread {
    pub(crate) fn new(
        group_id: GroupId,
        preference_key: String,
        messages: Vec<ThreadMessage>,
    ) -> Self {
        let now = Utc::now();
        let last_activity_at = messages.last().map(|m| m.created_at).unwrap_or(now);
        Self {
            id: ThreadId::new_v4(),
            group_id,
            preference_key,
            messages,
            created_at: now,
            last_activity_at,
        }
    }

    /// Render the thread as ordered context lines.
    pub fn render_context(&self) -> String {
        self.messages
            .iter()
            .map(render_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render with `[id:i]` prefixes for index-addressable analysis output.
    pub fn render_context_indexed(&self) -> String {
        self.messages
            .iter()
            .enumerate()
            .map(|(i, message)| format!("[{}:{i}] {}", self.id, render_line(message)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the earliest `n` entries, clamped to the thread length.
    pub fn render_earliest(&self, n: usize) -> String {
        self.messages[..n.min(self.messages.len())]
            .iter()
            .map(render_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_line(message: &ThreadMessage) -> String {
    if message.is_summary {
        format!("[Summary of earlier messages]: {}", message.content)
    } else if message.is_bot_reply {
        format!("Bot: {}", message.content)
    } else {
        format!("User {}: {}", message.user_id, message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn placeholder_only_content_is_not_substantive() {
        assert!(!is_substantive(""));
        assert!(!is_substantive("   "));
        assert!(!is_substantive("[Image: cat.jpg]"));
        assert!(!is_substantive("[Voice] [Image: a.png]"));
        assert!(is_substantive("look at this [Image: cat.jpg]"));
        assert!(is_substantive("hello"));
    }

    #[test]
    fn summary_entries_render_with_marker() {
        let thread = ProactiveThread::new(
            Arc::from("g1"),
            "default".into(),
            vec![
                ThreadMessage::summary("we argued about lunch"),
                ThreadMessage::user(7, "pizza then"),
                ThreadMessage::bot("pizza it is"),
            ],
        );
        let rendered = thread.render_context();
        assert_eq!(
            rendered,
            "[Summary of earlier messages]: we argued about lunch\nUser 7: pizza then\nBot: pizza it is"
        );
    }

    #[test]
    fn indexed_rendering_carries_thread_id() {
        let thread = ProactiveThread::new(
            Arc::from("g1"),
            "default".into(),
            vec![ThreadMessage::user(7, "hi")],
        );
        let rendered = thread.render_context_indexed();
        assert_eq!(rendered, format!("[{}:0] User 7: hi", thread.id));
    }

    #[test]
    fn new_thread_takes_activity_from_last_message() {
        let first = ThreadMessage::user(1, "a");
        let last = ThreadMessage::user(2, "b");
        let expected = last.created_at;
        let thread = ProactiveThread::new(Arc::from("g1"), "default".into(), vec![first, last]);
        assert_eq!(thread.last_activity_at, expected);
    }
}
