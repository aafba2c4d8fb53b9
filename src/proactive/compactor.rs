//! Background context compression for aging threads.

use super::store::ThreadStore;
use crate::analysis::Analyzer;
use crate::config::CompressionConfig;
use crate::sync::lock;
use crate::{GroupId, ThreadId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Compresses the earliest segment of oversized threads without blocking
/// the reply path. At most one compression runs per thread at a time;
/// different threads compress independently.
pub struct Compactor {
    store: Arc<ThreadStore>,
    analyzer: Arc<dyn Analyzer>,
    config: CompressionConfig,
    /// Threads with a compression currently in flight.
    in_flight: Mutex<HashSet<ThreadId>>,
}

impl Compactor {
    pub fn new(store: Arc<ThreadStore>, analyzer: Arc<dyn Analyzer>, config: CompressionConfig) -> Self {
        Self {
            store,
            analyzer,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Defer a compression pass for the group's threads to the scheduler.
    /// Non-blocking for the calling reply flow.
    pub fn schedule(self: &Arc<Self>, group_id: &GroupId) {
        let compactor = Arc::clone(self);
        let group_id = group_id.clone();
        tokio::spawn(async move {
            compactor.run_for_group(&group_id).await;
        });
    }

    /// Compress every oversized thread of the group, each independently.
    pub(crate) async fn run_for_group(&self, group_id: &GroupId) {
        let candidates: Vec<ThreadId> = self
            .store
            .active_threads(group_id)
            .into_iter()
            .filter(|thread| thread.messages.len() > self.config.ceiling)
            .map(|thread| thread.id)
            .collect();

        let passes = candidates
            .into_iter()
            .filter(|id| self.begin(*id))
            .map(|id| async move {
                let result = self.compress_thread(id).await;
                // Marker is released on every path, including errors.
                self.finish(id);
                if let Err(error) = result {
                    tracing::warn!(%error, thread_id = %id, "compression failed, thread unmodified");
                }
            });
        futures::future::join_all(passes).await;
    }

    fn begin(&self, thread_id: ThreadId) -> bool {
        let started = lock(&self.in_flight).insert(thread_id);
        if !started {
            tracing::debug!(%thread_id, "compression already in flight, skipping");
        }
        started
    }

    fn finish(&self, thread_id: ThreadId) {
        lock(&self.in_flight).remove(&thread_id);
    }

    /// Summarize the earliest segment and replace it. All-or-nothing: any
    /// failure or empty summary leaves the thread untouched.
    async fn compress_thread(&self, thread_id: ThreadId) -> crate::Result<()> {
        let Some(thread) = self.store.thread(thread_id) else {
            return Ok(());
        };
        if thread.messages.len() <= self.config.ceiling {
            return Ok(());
        }
        // Clamp so at least one message survives the replacement.
        let take = self.config.segment.min(thread.messages.len() - 1);
        if take == 0 {
            return Ok(());
        }

        let segment = thread.render_earliest(take);
        let summary = self.analyzer.summarize_segment(&segment).await?;
        if summary.trim().is_empty() {
            tracing::warn!(%thread_id, "summarizer returned empty text, thread unmodified");
            return Ok(());
        }

        self.store.replace_earliest_with_summary(thread_id, take, &summary);
        tracing::debug!(%thread_id, replaced = take, "thread segment compressed");
        Ok(())
    }
}
