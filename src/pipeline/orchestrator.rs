//! Staged lifecycle orchestrator.
//!
//! Each run walks six ordered stages. Every stage first fires its named
//! hook (subscribers can veto the rest of the run), then executes the
//! stage's registered systems in priority order. A failing system is
//! logged and skipped; an error escaping a stage is caught once at the top
//! level and routed to the error hook.

use super::context::PipelineContext;
use super::hooks::{HookBus, HookOutcome};
use crate::InboundMessage;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    OnMessageReceived,
    Preprocess,
    Process,
    Prepare,
    Send,
    Complete,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::OnMessageReceived,
        Stage::Preprocess,
        Stage::Process,
        Stage::Prepare,
        Stage::Send,
        Stage::Complete,
    ];

    /// Name of the hook fired before this stage's systems run.
    pub fn hook_name(self) -> &'static str {
        match self {
            Stage::OnMessageReceived => "on_message_received",
            Stage::Preprocess => "preprocess",
            Stage::Process => "process",
            Stage::Prepare => "prepare",
            Stage::Send => "send",
            Stage::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hook_name())
    }
}

/// Hook fired once when a run fails with an uncaught error.
pub const ERROR_HOOK: &str = "on_error";

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// A hook vetoed continuation at this stage.
    Aborted(Stage),
}

/// A unit of per-stage work.
#[async_trait]
pub trait System: Send + Sync {
    fn name(&self) -> &str;

    fn stage(&self) -> Stage;

    /// Higher priority runs first within the stage.
    fn priority(&self) -> i32 {
        0
    }

    /// Hook names this system makes available for external subscribers.
    /// Declaring a name installs no default behavior.
    fn extension_hooks(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, ctx: &Arc<PipelineContext>) -> Result<()>;
}

/// The staged lifecycle orchestrator.
pub struct Pipeline {
    hooks: Arc<HookBus>,
    systems: HashMap<Stage, Vec<Arc<dyn System>>>,
}

impl Pipeline {
    pub fn new(hooks: Arc<HookBus>) -> Self {
        for stage in Stage::ALL {
            hooks.declare(stage.hook_name());
        }
        hooks.declare(ERROR_HOOK);
        Self {
            hooks,
            systems: HashMap::new(),
        }
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    /// Register a system into its stage, keeping priority order.
    pub fn register(&mut self, system: Arc<dyn System>) {
        for hook in system.extension_hooks() {
            self.hooks.declare(&hook);
        }
        let list = self.systems.entry(system.stage()).or_default();
        list.push(system);
        list.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// Run one inbound message through all stages.
    pub async fn run(&self, message: InboundMessage) -> Result<RunOutcome> {
        let ctx = Arc::new(PipelineContext::new(message));
        match self.run_stages(&ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                tracing::error!(%error, message_id = %ctx.message.id, "pipeline run failed");
                if let Err(hook_error) = self.hooks.execute(ERROR_HOOK, &ctx).await {
                    tracing::error!(%hook_error, "error hook failed");
                }
                Err(error)
            }
        }
    }

    async fn run_stages(&self, ctx: &Arc<PipelineContext>) -> Result<RunOutcome> {
        for stage in Stage::ALL {
            if self.hooks.execute(stage.hook_name(), ctx).await? == HookOutcome::Abort {
                tracing::debug!(stage = %stage, message_id = %ctx.message.id, "run aborted by hook");
                return Ok(RunOutcome::Aborted(stage));
            }
            if let Some(systems) = self.systems.get(&stage) {
                for system in systems {
                    if let Err(error) = system.run(ctx).await {
                        tracing::warn!(
                            %error,
                            system = system.name(),
                            stage = %stage,
                            "system failed, continuing stage"
                        );
                    }
                }
            }
        }
        Ok(RunOutcome::Completed)
    }
}
