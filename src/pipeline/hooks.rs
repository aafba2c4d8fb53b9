//! String-named hook bus with priority-ordered handlers and abort
//! semantics.

use super::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::sync::lock;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Continuation result returned by a hook handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Keep running the current stage and the rest of the run.
    Continue,
    /// Abort the entire run; remaining stages are skipped.
    Abort,
}

type HookFn = Arc<dyn Fn(Arc<PipelineContext>) -> BoxFuture<'static, Result<HookOutcome>> + Send + Sync>;

struct HookEntry {
    priority: i32,
    handler: HookFn,
}

/// Registry of named extension points.
#[derive(Default)]
pub struct HookBus {
    entries: Mutex<HashMap<String, Vec<HookEntry>>>,
    /// Names declared as available for subscribers. Declaring installs no
    /// behavior.
    declared: Mutex<HashSet<String>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a hook name available for external subscribers.
    pub fn declare(&self, name: &str) {
        lock(&self.declared).insert(name.to_string());
    }

    /// All declared hook names, sorted.
    pub fn declared(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.declared).iter().cloned().collect();
        names.sort();
        names
    }

    /// Subscribe a handler; higher priority runs first.
    pub fn subscribe<F, Fut>(&self, name: &str, priority: i32, handler: F)
    where
        F: Fn(Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookOutcome>> + Send + 'static,
    {
        let handler: HookFn = Arc::new(move |ctx| Box::pin(handler(ctx)));
        {
            let mut entries = lock(&self.entries);
            let list = entries.entry(name.to_string()).or_default();
            list.push(HookEntry { priority, handler });
            list.sort_by_key(|entry| std::cmp::Reverse(entry.priority));
        }
        self.declare(name);
    }

    /// Run every handler for a hook in priority order. The first `Abort`
    /// wins. A handler error is stage-fatal and surfaces to the run's
    /// top-level catch.
    pub async fn execute(&self, name: &str, ctx: &Arc<PipelineContext>) -> Result<HookOutcome> {
        let handlers: Vec<HookFn> = lock(&self.entries)
            .get(name)
            .map(|list| list.iter().map(|entry| entry.handler.clone()).collect())
            .unwrap_or_default();

        for handler in handlers {
            match handler(Arc::clone(ctx)).await {
                Ok(HookOutcome::Continue) => {}
                Ok(HookOutcome::Abort) => return Ok(HookOutcome::Abort),
                Err(error) => {
                    return Err(PipelineError::HookFailed {
                        hook: name.to_string(),
                        source: anyhow::anyhow!(error),
                    }
                    .into());
                }
            }
        }
        Ok(HookOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InboundMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Arc<PipelineContext> {
        Arc::new(PipelineContext::new(InboundMessage {
            id: "m1".into(),
            group_id: Some(Arc::from("g1")),
            sender_id: 7,
            content: "hello".into(),
            segments: Vec::new(),
            addressed_bot: false,
            timestamp: chrono::Utc::now(),
        }))
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let bus = HookBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let record = |tag: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
            move |_ctx: Arc<PipelineContext>| {
                let order = order.clone();
                async move {
                    lock(&order).push(tag);
                    Ok(HookOutcome::Continue)
                }
            }
        };
        bus.subscribe("stage", 1, record("low", order.clone()));
        bus.subscribe("stage", 10, record("high", order.clone()));

        let outcome = bus.execute("stage", &ctx()).await.expect("executes");
        assert_eq!(outcome, HookOutcome::Continue);
        assert_eq!(*lock(&order), ["high", "low"]);
    }

    #[tokio::test]
    async fn abort_short_circuits_remaining_handlers() {
        let bus = HookBus::new();
        let later_ran = Arc::new(AtomicUsize::new(0));

        bus.subscribe("stage", 10, |_ctx| async { Ok(HookOutcome::Abort) });
        let later = later_ran.clone();
        bus.subscribe("stage", 1, move |_ctx| {
            let later = later.clone();
            async move {
                later.fetch_add(1, Ordering::SeqCst);
                Ok(HookOutcome::Continue)
            }
        });

        let outcome = bus.execute("stage", &ctx()).await.expect("executes");
        assert_eq!(outcome, HookOutcome::Abort);
        assert_eq!(later_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_names_the_hook() {
        let bus = HookBus::new();
        bus.subscribe("broken", 0, |_ctx| async {
            Err(anyhow::anyhow!("boom").into())
        });

        let error = bus.execute("broken", &ctx()).await.expect_err("fails");
        assert!(error.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn unsubscribed_hook_continues() {
        let bus = HookBus::new();
        let outcome = bus.execute("nobody_home", &ctx()).await.expect("executes");
        assert_eq!(outcome, HookOutcome::Continue);
    }

    #[test]
    fn declared_names_are_listed() {
        let bus = HookBus::new();
        bus.declare("custom_point");
        bus.subscribe("other", 0, |_ctx| async { Ok(HookOutcome::Continue) });
        assert_eq!(bus.declared(), ["custom_point", "other"]);
    }
}
