//! Chime: a proactive participation engine for group-chat bots.
//!
//! Every inbound chat event runs through a staged lifecycle pipeline; the
//! pipeline's completion hook feeds the proactive engine, which tracks
//! conversational threads per group, debounces analysis, injects replies,
//! and compresses aging thread context in the background.

pub mod analysis;
pub mod archive;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod history;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod proactive;
pub mod prompts;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Group identifier type.
pub type GroupId = Arc<str>;

/// Thread identifier type.
pub type ThreadId = uuid::Uuid;

/// User id reserved for the bot's own messages.
pub const BOT_USER_ID: i64 = 0;

/// Inbound message from a chat platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Group the message was posted in. None for direct messages.
    pub group_id: Option<GroupId>,
    pub sender_id: i64,
    /// Flattened text content.
    pub content: String,
    /// Structured segments, preferred over `content` where present.
    pub segments: Vec<Segment>,
    /// Whether the message explicitly addressed the bot (mention or reply).
    pub addressed_bot: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl InboundMessage {
    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }
}

/// Message content segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Mention { user_id: i64 },
    Reply { message_id: String },
    /// Non-text content carried as a bracketed label, e.g. "[Image: a.jpg]".
    Media { label: String },
}

/// Shared dependency bundle for the proactive engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub analyzer: Arc<dyn analysis::Analyzer>,
    pub history: Arc<dyn history::HistoryProvider>,
    pub knowledge: Arc<dyn knowledge::KnowledgeRetriever>,
    pub archiver: Arc<dyn archive::ThreadArchiver>,
    pub sink: Arc<dyn delivery::ReplySink>,
    pub prompts: Arc<prompts::PromptEngine>,
    pub runtime_config: Arc<config::RuntimeConfig>,
}

impl EngineDeps {
    /// Load the current group registry snapshot.
    pub fn groups(&self) -> arc_swap::Guard<Arc<config::GroupRegistry>> {
        self.runtime_config.groups.load()
    }

    pub fn proactive(&self) -> &config::ProactiveConfig {
        &self.runtime_config.proactive
    }
}

pub(crate) mod sync {
    use std::sync::{Mutex, MutexGuard};

    /// Lock a mutex, recovering the data if a panicking thread poisoned it.
    pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
