//! Analysis collaborator contract: the LLM-backed decision seam.

use crate::ThreadId;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Routing decision returned by an analysis call.
///
/// Every field defaults so a partial LLM object still deserializes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Decision {
    /// Whether the bot should inject a reply this cycle.
    pub should_join: bool,

    /// Topic or query for supplementary knowledge retrieval.
    pub topic: Option<String>,

    /// Live thread to reply in.
    pub reply_in_thread_id: Option<ThreadId>,

    /// Create a new thread seeded from recent history.
    pub create_new: bool,

    /// Live thread that should be ended, independent of joining.
    pub thread_should_end_id: Option<ThreadId>,

    /// 0-based positions into the just-loaded recent-history list.
    pub message_ids: Vec<usize>,
}

/// One active thread's context offered to multi-thread analysis.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub thread_id: ThreadId,
    pub preference_key: String,
    pub context_text: String,
}

/// LLM-backed collaborator consulted by the proactive engine.
///
/// All LLM work flows through this one seam: join/route decisions, reply
/// composition, and segment summarization for compression.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Decide whether to join when no thread is active.
    async fn analyze(&self, persona: &str, recent: &str) -> Result<Decision>;

    /// Decide whether and where to join when threads are active.
    async fn analyze_with_threads(
        &self,
        persona: &str,
        recent: &str,
        threads: &[ThreadContext],
    ) -> Result<Decision>;

    /// Compose a reply from a thread's formatted context plus knowledge.
    async fn compose_reply(
        &self,
        persona: &str,
        context: &str,
        knowledge: &[String],
    ) -> Result<String>;

    /// Summarize an aging context segment into one compact paragraph.
    async fn summarize_segment(&self, segment: &str) -> Result<String>;
}
