//! Proactive orchestrator: debounced per-group analysis and reply injection.

use super::compactor::Compactor;
use super::store::ThreadStore;
use super::thread::ThreadMessage;
use crate::analysis::ThreadContext;
use crate::history::{render_recent, render_recent_indexed};
use crate::knowledge::RetrieveOptions;
use crate::pipeline::{HookBus, HookOutcome, Stage};
use crate::sync::lock;
use crate::{EngineDeps, GroupId, ThreadId};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Decides, per group and on a debounced cadence, whether and where to
/// inject a reply into the conversation.
pub struct ProactiveEngine {
    store: Arc<ThreadStore>,
    deps: EngineDeps,
    compactor: Arc<Compactor>,
    /// Pending debounce timers, one per group. A new trigger replaces the
    /// previous timer rather than merely suppressing it.
    timers: Mutex<HashMap<GroupId, JoinHandle<()>>>,
}

impl ProactiveEngine {
    pub fn new(store: Arc<ThreadStore>, deps: EngineDeps) -> Arc<Self> {
        let compactor = Arc::new(Compactor::new(
            store.clone(),
            deps.analyzer.clone(),
            deps.runtime_config.proactive.compression,
        ));
        Arc::new(Self {
            store,
            deps,
            compactor,
            timers: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    /// Arm (or re-arm) the group's debounce timer. Bursts of rapid messages
    /// coalesce into a single analysis run per quiet period. No-op for
    /// groups not configured for proactive behavior.
    pub fn schedule_for_group(self: &Arc<Self>, group_id: &GroupId) {
        if !self.deps.groups().is_proactive(group_id) {
            return;
        }
        let debounce = std::time::Duration::from_millis(self.deps.proactive().debounce_ms);
        let engine = Arc::clone(self);
        let group = group_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Detach the run so a later re-arm cannot cancel an analysis
            // that has already started.
            let engine2 = Arc::clone(&engine);
            tokio::spawn(async move {
                engine2.run_analysis(&group).await;
            });
        });
        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.insert(group_id.clone(), timer) {
            previous.abort();
        }
    }

    /// One analysis cycle for a group. Every failure degrades to "no action
    /// this cycle" plus a log line; nothing here crashes the process.
    pub async fn run_analysis(&self, group_id: &GroupId) {
        self.retire_idle_threads(group_id).await;

        let Some(profile) = self.deps.groups().get(group_id).cloned() else {
            tracing::warn!(group_id = %group_id, "analysis cycle for unconfigured group");
            return;
        };

        let persona = match self.deps.prompts.render_persona(&profile.preference_key) {
            Ok(persona) => persona,
            Err(error) => {
                tracing::warn!(%error, group_id = %group_id, "persona render failed, aborting cycle");
                return;
            }
        };

        let limit = self.deps.proactive().history_limit;
        let recent = match self.deps.history.recent_messages(group_id, limit).await {
            Ok(recent) => recent,
            Err(error) => {
                tracing::warn!(%error, group_id = %group_id, "history load failed");
                return;
            }
        };
        if recent.is_empty() {
            tracing::debug!(group_id = %group_id, "no recent history, nothing to analyze");
            return;
        }

        let active = self.store.active_threads(group_id);
        let decision = if active.is_empty() {
            self.deps
                .analyzer
                .analyze(&persona, &render_recent(&recent))
                .await
        } else {
            let threads: Vec<ThreadContext> = active
                .iter()
                .map(|thread| ThreadContext {
                    thread_id: thread.id,
                    preference_key: thread.preference_key.clone(),
                    context_text: thread.render_context(),
                })
                .collect();
            self.deps
                .analyzer
                .analyze_with_threads(&persona, &render_recent_indexed(&recent), &threads)
                .await
        };
        let decision = match decision {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(%error, group_id = %group_id, "analysis call failed");
                return;
            }
        };
        tracing::debug!(
            group_id = %group_id,
            should_join = decision.should_join,
            "analysis decision"
        );

        // An end flag applies whether or not the bot joins.
        if let Some(end_id) = decision.thread_should_end_id {
            self.end_thread_persisted(group_id, end_id).await;
        }

        if !decision.should_join {
            self.compactor.schedule(group_id);
            return;
        }

        let topic = decision.topic.clone().unwrap_or_default();
        let reply_target = decision
            .reply_in_thread_id
            .filter(|id| self.store.thread(*id).is_some_and(|t| t.group_id == *group_id));

        if let Some(thread_id) = reply_target {
            self.store.set_current_thread(group_id, thread_id);
            if !decision.message_ids.is_empty() {
                self.store
                    .append_group_messages(thread_id, &recent, &decision.message_ids);
            }
            self.reply_in_thread(group_id, thread_id, &persona, &profile.preference_key, &topic)
                .await;
        } else if decision.create_new || !self.store.has_active_thread(group_id) {
            let seed: Vec<ThreadMessage> = recent.iter().map(ThreadMessage::from_recent).collect();
            let thread_id = self
                .store
                .create(group_id.clone(), profile.preference_key.clone(), seed);
            tracing::info!(group_id = %group_id, %thread_id, "joining with a new thread");
            self.reply_in_thread(group_id, thread_id, &persona, &profile.preference_key, &topic)
                .await;
        } else {
            tracing::debug!(group_id = %group_id, "join requested without a live target, skipping");
        }

        self.compactor.schedule(group_id);
    }

    /// Retire threads idle beyond the threshold: persist, then remove.
    ///
    /// Evaluated lazily at the start of each cycle, so a group that falls
    /// permanently silent never retires its last thread.
    async fn retire_idle_threads(&self, group_id: &GroupId) {
        let cutoff = Utc::now() - Duration::seconds(self.deps.proactive().idle_timeout_secs);
        for thread in self.store.active_threads(group_id) {
            if thread.last_activity_at >= cutoff {
                continue;
            }
            tracing::info!(thread_id = %thread.id, group_id = %group_id, "retiring idle thread");
            match self.deps.archiver.save_ended_thread(&thread, None).await {
                Ok(()) => {
                    self.store.end_thread(thread.id);
                }
                Err(error) => {
                    tracing::warn!(%error, thread_id = %thread.id, "archive failed, leaving thread for next cycle");
                }
            }
        }
    }

    async fn end_thread_persisted(&self, group_id: &GroupId, thread_id: ThreadId) {
        let Some(thread) = self.store.thread(thread_id) else {
            tracing::debug!(%thread_id, "decision named an unknown thread to end");
            return;
        };
        if thread.group_id != *group_id {
            tracing::warn!(%thread_id, group_id = %group_id, "decision named a thread from another group");
            return;
        }
        match self.deps.archiver.save_ended_thread(&thread, None).await {
            Ok(()) => {
                self.store.end_thread(thread_id);
            }
            Err(error) => {
                tracing::warn!(%error, %thread_id, "archive failed, thread kept");
            }
        }
    }

    /// Compose, send, and record one proactive reply into a thread.
    async fn reply_in_thread(
        &self,
        group_id: &GroupId,
        thread_id: ThreadId,
        persona: &str,
        preference_key: &str,
        topic: &str,
    ) {
        let Some(context) = self.store.context_formatted(thread_id) else {
            return;
        };

        // An empty topic is valid and yields no supplementary knowledge.
        let knowledge = if topic.trim().is_empty() {
            Vec::new()
        } else {
            let options = RetrieveOptions {
                limit: Some(self.deps.proactive().knowledge_limit),
                search_queries: Vec::new(),
            };
            match self
                .deps
                .knowledge
                .retrieve(preference_key, topic, options)
                .await
            {
                Ok(chunks) => chunks,
                Err(error) => {
                    tracing::warn!(%error, group_id = %group_id, "knowledge retrieval failed, replying without it");
                    Vec::new()
                }
            }
        };

        let reply = match self
            .deps
            .analyzer
            .compose_reply(persona, &context, &knowledge)
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(%error, %thread_id, "reply composition failed");
                return;
            }
        };
        if reply.trim().is_empty() {
            tracing::warn!(%thread_id, "composer returned empty reply, nothing sent");
            return;
        }

        if let Err(error) = self.deps.sink.send(group_id, &reply).await {
            tracing::warn!(%error, group_id = %group_id, "reply send failed");
            return;
        }
        self.store.append_message(thread_id, ThreadMessage::bot(reply));
    }

    /// Subscribe the engine to the pipeline's completion hook so every
    /// group message re-arms its group's debounce timer.
    pub fn install_completion_trigger(self: &Arc<Self>, hooks: &HookBus) {
        let engine = Arc::clone(self);
        hooks.subscribe(Stage::Complete.hook_name(), 0, move |ctx| {
            let engine = Arc::clone(&engine);
            async move {
                if let Some(group_id) = ctx.message.group_id.clone() {
                    engine.schedule_for_group(&group_id);
                }
                Ok(HookOutcome::Continue)
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, Decision};
    use crate::archive::ThreadArchiver;
    use crate::config::{CompressionConfig, Config, GroupProfile, ProactiveConfig, RuntimeConfig};
    use crate::delivery::ReplySink;
    use crate::history::{HistoryProvider, RecentMessage};
    use crate::knowledge::NoKnowledge;
    use crate::proactive::thread::ProactiveThread;
    use crate::prompts::PromptEngine;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gid(s: &str) -> GroupId {
        Arc::from(s)
    }

    #[derive(Default)]
    struct ScriptedAnalyzer {
        decisions: Mutex<VecDeque<Decision>>,
        analyze_calls: AtomicUsize,
        reply: String,
        summary: String,
    }

    impl ScriptedAnalyzer {
        fn with_decisions(decisions: Vec<Decision>, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                decisions: Mutex::new(decisions.into()),
                analyze_calls: AtomicUsize::new(0),
                reply: reply.to_string(),
                summary: "condensed".to_string(),
            })
        }

        fn next_decision(&self) -> Decision {
            self.analyze_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.decisions).pop_front().unwrap_or_default()
        }
    }

    #[async_trait]
    impl Analyzer for ScriptedAnalyzer {
        async fn analyze(&self, _: &str, _: &str) -> crate::Result<Decision> {
            Ok(self.next_decision())
        }

        async fn analyze_with_threads(
            &self,
            _: &str,
            _: &str,
            _: &[ThreadContext],
        ) -> crate::Result<Decision> {
            Ok(self.next_decision())
        }

        async fn compose_reply(&self, _: &str, _: &str, _: &[String]) -> crate::Result<String> {
            Ok(self.reply.clone())
        }

        async fn summarize_segment(&self, _: &str) -> crate::Result<String> {
            Ok(self.summary.clone())
        }
    }

    struct FixedHistory {
        messages: Vec<RecentMessage>,
    }

    #[async_trait]
    impl HistoryProvider for FixedHistory {
        async fn recent_messages(
            &self,
            _: &GroupId,
            _: usize,
        ) -> crate::Result<Vec<RecentMessage>> {
            Ok(self.messages.clone())
        }
    }

    #[derive(Default)]
    struct RecordingArchiver {
        saved: Mutex<Vec<ProactiveThread>>,
    }

    #[async_trait]
    impl ThreadArchiver for RecordingArchiver {
        async fn save_ended_thread(
            &self,
            thread: &ProactiveThread,
            _: Option<&str>,
        ) -> crate::Result<()> {
            lock(&self.saved).push(thread.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send(&self, group_id: &GroupId, text: &str) -> crate::Result<()> {
            lock(&self.sent).push((group_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn recent_window(count: usize) -> Vec<RecentMessage> {
        (0..count)
            .map(|i| RecentMessage {
                user_id: (i % 3) as i64 + 1,
                content: format!("chatter {i}"),
                is_bot_reply: false,
                created_at: Utc::now(),
            })
            .collect()
    }

    fn test_deps(
        analyzer: Arc<ScriptedAnalyzer>,
        history: Vec<RecentMessage>,
        archiver: Arc<RecordingArchiver>,
        sink: Arc<RecordingSink>,
        proactive: ProactiveConfig,
    ) -> EngineDeps {
        let config = Config {
            proactive,
            groups: HashMap::from([("g1".to_string(), GroupProfile::default())]),
            ..Config::default()
        };
        EngineDeps {
            analyzer,
            history: Arc::new(FixedHistory { messages: history }),
            knowledge: Arc::new(NoKnowledge),
            archiver,
            sink,
            prompts: Arc::new(PromptEngine::new(HashMap::new())),
            runtime_config: RuntimeConfig::new(&config),
        }
    }

    fn short_debounce() -> ProactiveConfig {
        ProactiveConfig {
            debounce_ms: 50,
            ..ProactiveConfig::default()
        }
    }

    /// Five rapid triggers within the debounce window collapse into exactly
    /// one analysis run.
    #[tokio::test]
    async fn debounce_collapses_rapid_triggers() {
        let analyzer = ScriptedAnalyzer::with_decisions(Vec::new(), "");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = test_deps(
            analyzer.clone(),
            recent_window(3),
            archiver,
            sink,
            short_debounce(),
        );
        let engine = ProactiveEngine::new(Arc::new(ThreadStore::new()), deps);

        let group = gid("g1");
        for _ in 0..5 {
            engine.schedule_for_group(&group);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_group_is_never_scheduled() {
        let analyzer = ScriptedAnalyzer::with_decisions(Vec::new(), "");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = test_deps(
            analyzer.clone(),
            recent_window(3),
            archiver,
            sink,
            short_debounce(),
        );
        let engine = ProactiveEngine::new(Arc::new(ThreadStore::new()), deps);

        engine.schedule_for_group(&gid("nowhere"));
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
    }

    /// A thread idle past the threshold is persisted and removed at the
    /// next cycle; a fresh thread is untouched.
    #[tokio::test]
    async fn idle_threads_are_retired_lazily() {
        let analyzer = ScriptedAnalyzer::with_decisions(Vec::new(), "");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = test_deps(
            analyzer,
            recent_window(3),
            archiver.clone(),
            sink,
            ProactiveConfig::default(),
        );
        let store = Arc::new(ThreadStore::new());
        let engine = ProactiveEngine::new(store.clone(), deps);

        let mut stale = ThreadMessage::user(7, "old news");
        stale.created_at = Utc::now() - Duration::hours(2);
        let idle_id = store.create(gid("g1"), "default", vec![stale]);
        let fresh_id = store.create(gid("g1"), "default", vec![ThreadMessage::user(8, "hot take")]);

        engine.run_analysis(&gid("g1")).await;

        let saved = lock(&archiver.saved);
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, idle_id);
        assert!(store.thread(idle_id).is_none());
        assert!(store.thread(fresh_id).is_some());
    }

    /// With no active thread and `createNew`, exactly one thread is
    /// created, one reply sent, and the bot message appended.
    #[tokio::test]
    async fn create_new_seeds_thread_and_replies() {
        let decision = Decision {
            should_join: true,
            create_new: true,
            ..Decision::default()
        };
        let analyzer = ScriptedAnalyzer::with_decisions(vec![decision], "count me in");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = test_deps(
            analyzer,
            recent_window(30),
            archiver,
            sink.clone(),
            ProactiveConfig::default(),
        );
        let store = Arc::new(ThreadStore::new());
        let engine = ProactiveEngine::new(store.clone(), deps);

        engine.run_analysis(&gid("g1")).await;

        let threads = store.active_threads(&gid("g1"));
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].messages.len(), 31);
        let last = threads[0].messages.last().expect("messages");
        assert!(last.is_bot_reply);
        assert_eq!(last.content, "count me in");

        let sent = lock(&sink.sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "count me in");
    }

    /// An end flag is honored without joining: the thread is persisted and
    /// removed, nothing is sent, and compression still runs for the
    /// group's remaining threads.
    #[tokio::test]
    async fn end_flag_without_join_persists_and_compresses() {
        let store = Arc::new(ThreadStore::new());
        let keep_id = store.create(
            gid("g1"),
            "default",
            (0..5).map(|i| ThreadMessage::user(7, format!("kept {i}"))).collect(),
        );
        let end_id = store.create(
            gid("g1"),
            "default",
            vec![ThreadMessage::user(8, "wrapping up")],
        );

        let decision = Decision {
            should_join: false,
            thread_should_end_id: Some(end_id),
            ..Decision::default()
        };
        let analyzer = ScriptedAnalyzer::with_decisions(vec![decision], "");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let proactive = ProactiveConfig {
            compression: CompressionConfig { ceiling: 3, segment: 2 },
            ..ProactiveConfig::default()
        };
        let deps = test_deps(analyzer, recent_window(3), archiver.clone(), sink.clone(), proactive);
        let engine = ProactiveEngine::new(store.clone(), deps);

        engine.run_analysis(&gid("g1")).await;

        assert_eq!(lock(&archiver.saved).len(), 1);
        assert!(store.thread(end_id).is_none());
        assert!(lock(&sink.sent).is_empty());

        // The deferred compression pass shrinks the surviving thread.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let kept = store.thread(keep_id).expect("thread");
        assert_eq!(kept.messages.len(), 4);
        assert!(kept.messages[0].is_summary);
    }

    /// Replying into a named live thread appends only the selected history
    /// positions, then the bot's own reply.
    #[tokio::test]
    async fn reply_in_thread_appends_selected_messages() {
        let store = Arc::new(ThreadStore::new());
        let thread_id = store.create(
            gid("g1"),
            "default",
            (0..3).map(|i| ThreadMessage::user(7, format!("seed {i}"))).collect(),
        );

        let decision = Decision {
            should_join: true,
            reply_in_thread_id: Some(thread_id),
            message_ids: vec![0, 2],
            topic: Some("lunch plans".into()),
            ..Decision::default()
        };
        let analyzer = ScriptedAnalyzer::with_decisions(vec![decision], "get the pizza");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = test_deps(
            analyzer,
            recent_window(5),
            archiver,
            sink.clone(),
            ProactiveConfig::default(),
        );
        let engine = ProactiveEngine::new(store.clone(), deps);

        engine.run_analysis(&gid("g1")).await;

        let thread = store.thread(thread_id).expect("thread");
        // 3 seeded + 2 selected + 1 bot reply.
        assert_eq!(thread.messages.len(), 6);
        assert_eq!(thread.messages[3].content, "chatter 0");
        assert_eq!(thread.messages[4].content, "chatter 2");
        assert!(thread.messages[5].is_bot_reply);
        assert_eq!(lock(&sink.sent).len(), 1);
        assert_eq!(store.active_thread(&gid("g1")).map(|t| t.id), Some(thread_id));
    }

    /// A join naming a dead thread with live threads remaining and no
    /// `createNew` takes no reply action.
    #[tokio::test]
    async fn join_without_live_target_is_skipped() {
        let store = Arc::new(ThreadStore::new());
        store.create(gid("g1"), "default", vec![ThreadMessage::user(7, "around")]);

        let decision = Decision {
            should_join: true,
            reply_in_thread_id: Some(ThreadId::new_v4()),
            ..Decision::default()
        };
        let analyzer = ScriptedAnalyzer::with_decisions(vec![decision], "should not send");
        let archiver = Arc::new(RecordingArchiver::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = test_deps(
            analyzer,
            recent_window(3),
            archiver,
            sink.clone(),
            ProactiveConfig::default(),
        );
        let engine = ProactiveEngine::new(store.clone(), deps);

        engine.run_analysis(&gid("g1")).await;

        assert!(lock(&sink.sent).is_empty());
        assert_eq!(store.active_threads(&gid("g1")).len(), 1);
    }
}
