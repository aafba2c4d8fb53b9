//! In-memory thread store: the single source of truth for active threads.

use super::thread::{ProactiveThread, ThreadMessage, is_substantive};
use crate::history::RecentMessage;
use crate::sync::lock;
use crate::{GroupId, ThreadId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Owns all active per-group threads, addressable by id or by group.
///
/// Operations are synchronous and take effect atomically with respect to
/// task interleaving. Durability is out of scope: a process restart
/// discards all active threads. Operations on an unknown id are no-ops
/// with a logged warning.
#[derive(Debug, Default)]
pub struct ThreadStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    threads: HashMap<ThreadId, ProactiveThread>,
    group_threads: HashMap<GroupId, Vec<ThreadId>>,
    /// Reply-continuity pointer per group; not authoritative for routing.
    current: HashMap<GroupId, ThreadId>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a thread seeded with the substantive entries of `initial`,
    /// making it the group's current thread.
    pub fn create(
        &self,
        group_id: GroupId,
        preference_key: impl Into<String>,
        initial: Vec<ThreadMessage>,
    ) -> ThreadId {
        let messages: Vec<ThreadMessage> = initial
            .into_iter()
            .filter(|m| is_substantive(&m.content))
            .collect();
        let thread = ProactiveThread::new(group_id.clone(), preference_key.into(), messages);
        let id = thread.id;

        let mut inner = lock(&self.inner);
        inner.group_threads.entry(group_id.clone()).or_default().push(id);
        inner.current.insert(group_id, id);
        inner.threads.insert(id, thread);
        tracing::debug!(thread_id = %id, "thread created");
        id
    }

    /// Snapshot of a thread by id.
    pub fn thread(&self, thread_id: ThreadId) -> Option<ProactiveThread> {
        lock(&self.inner).threads.get(&thread_id).cloned()
    }

    /// Snapshots of all active threads for a group, in creation order.
    pub fn active_threads(&self, group_id: &GroupId) -> Vec<ProactiveThread> {
        let inner = lock(&self.inner);
        inner
            .group_threads
            .get(group_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.threads.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The group's current thread, falling back to the first active one.
    pub fn active_thread(&self, group_id: &GroupId) -> Option<ProactiveThread> {
        let inner = lock(&self.inner);
        let id = inner
            .current
            .get(group_id)
            .copied()
            .or_else(|| inner.group_threads.get(group_id).and_then(|ids| ids.first().copied()))?;
        inner.threads.get(&id).cloned()
    }

    pub fn has_active_thread(&self, group_id: &GroupId) -> bool {
        lock(&self.inner)
            .group_threads
            .get(group_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Point the group's reply-continuity pointer at a thread.
    pub fn set_current_thread(&self, group_id: &GroupId, thread_id: ThreadId) {
        let mut inner = lock(&self.inner);
        match inner.threads.get(&thread_id) {
            Some(thread) if thread.group_id == *group_id => {
                inner.current.insert(group_id.clone(), thread_id);
            }
            Some(_) => {
                tracing::warn!(%thread_id, group_id = %group_id, "thread belongs to a different group");
            }
            None => tracing::warn!(%thread_id, "set_current_thread on unknown thread"),
        }
    }

    /// Append one entry, advancing the activity timestamp to the entry's.
    pub fn append_message(&self, thread_id: ThreadId, entry: ThreadMessage) {
        let mut inner = lock(&self.inner);
        let Some(thread) = inner.threads.get_mut(&thread_id) else {
            tracing::warn!(%thread_id, "append_message on unknown thread");
            return;
        };
        thread.last_activity_at = entry.created_at;
        thread.messages.push(entry);
    }

    /// Append only the entries at the given 0-based positions into
    /// `entries`, in ascending order, skipping placeholder-only content.
    /// No-op without indices.
    pub fn append_group_messages(
        &self,
        thread_id: ThreadId,
        entries: &[RecentMessage],
        selected: &[usize],
    ) {
        if selected.is_empty() {
            return;
        }
        let mut indices = selected.to_vec();
        indices.sort_unstable();
        indices.dedup();

        let mut inner = lock(&self.inner);
        let Some(thread) = inner.threads.get_mut(&thread_id) else {
            tracing::warn!(%thread_id, "append_group_messages on unknown thread");
            return;
        };
        for index in indices {
            let Some(entry) = entries.get(index) else {
                tracing::warn!(%thread_id, index, "selected index out of range");
                continue;
            };
            if !is_substantive(&entry.content) {
                continue;
            }
            let message = ThreadMessage::from_recent(entry);
            thread.last_activity_at = message.created_at;
            thread.messages.push(message);
        }
    }

    /// Rendered context lines, or None for an unknown thread.
    pub fn context_formatted(&self, thread_id: ThreadId) -> Option<String> {
        let inner = lock(&self.inner);
        match inner.threads.get(&thread_id) {
            Some(thread) => Some(thread.render_context()),
            None => {
                tracing::warn!(%thread_id, "context_formatted on unknown thread");
                None
            }
        }
    }

    /// Rendered context with `[id:i]` index prefixes.
    pub fn context_formatted_with_indices(&self, thread_id: ThreadId) -> Option<String> {
        let inner = lock(&self.inner);
        match inner.threads.get(&thread_id) {
            Some(thread) => Some(thread.render_context_indexed()),
            None => {
                tracing::warn!(%thread_id, "context_formatted_with_indices on unknown thread");
                None
            }
        }
    }

    /// Destructive prune to exactly the given positions (deduplicated,
    /// sorted). Pruning to an empty set is a no-op with the original state
    /// preserved.
    pub fn keep_only_message_indices(&self, thread_id: ThreadId, indices: &[usize]) {
        let mut keep = indices.to_vec();
        keep.sort_unstable();
        keep.dedup();

        let mut inner = lock(&self.inner);
        let Some(thread) = inner.threads.get_mut(&thread_id) else {
            tracing::warn!(%thread_id, "keep_only_message_indices on unknown thread");
            return;
        };
        keep.retain(|&i| i < thread.messages.len());
        if keep.is_empty() {
            tracing::warn!(%thread_id, "prune would empty the thread, keeping original state");
            return;
        }
        let messages = std::mem::take(&mut thread.messages);
        thread.messages = messages
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.binary_search(i).is_ok())
            .map(|(_, message)| message)
            .collect();
    }

    /// Replace the first `n` messages with a single summary entry at
    /// position 0. No-op if `n` is out of range.
    pub fn replace_earliest_with_summary(&self, thread_id: ThreadId, n: usize, summary: &str) {
        let mut inner = lock(&self.inner);
        let Some(thread) = inner.threads.get_mut(&thread_id) else {
            tracing::warn!(%thread_id, "replace_earliest_with_summary on unknown thread");
            return;
        };
        if n == 0 || n > thread.messages.len() {
            tracing::warn!(%thread_id, n, len = thread.messages.len(), "summary replacement out of range");
            return;
        }
        thread.messages.drain(..n);
        thread.messages.insert(0, ThreadMessage::summary(summary));
    }

    /// Remove a thread from all indexes. If it was the group's current
    /// thread, promote another active thread or clear the pointer. Returns
    /// the removed thread.
    pub fn end_thread(&self, thread_id: ThreadId) -> Option<ProactiveThread> {
        let mut inner = lock(&self.inner);
        let Some(thread) = inner.threads.remove(&thread_id) else {
            tracing::warn!(%thread_id, "end_thread on unknown thread");
            return None;
        };
        if let Some(ids) = inner.group_threads.get_mut(&thread.group_id) {
            ids.retain(|id| *id != thread_id);
            if ids.is_empty() {
                inner.group_threads.remove(&thread.group_id);
            }
        }
        if inner.current.get(&thread.group_id) == Some(&thread_id) {
            let next = inner
                .group_threads
                .get(&thread.group_id)
                .and_then(|ids| ids.first())
                .copied();
            match next {
                Some(next) => {
                    inner.current.insert(thread.group_id.clone(), next);
                }
                None => {
                    inner.current.remove(&thread.group_id);
                }
            }
        }
        tracing::debug!(%thread_id, "thread ended");
        Some(thread)
    }
}
