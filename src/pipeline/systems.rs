//! Built-in pipeline systems.

use super::command::{self, CommandRegistry};
use super::context::PipelineContext;
use super::hooks::HookBus;
use super::orchestrator::{Stage, System};
use crate::archive::SqliteHistory;
use crate::delivery::ReplySink;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Fired by [`CommandExecute`] after a command handler ran.
pub const COMMAND_EXECUTED_HOOK: &str = "command_executed";

/// Detects a command prefix during PREPROCESS and computes the
/// reply-candidate flag.
pub struct CommandDetect {
    registry: Arc<dyn CommandRegistry>,
}

impl CommandDetect {
    pub fn new(registry: Arc<dyn CommandRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl System for CommandDetect {
    fn name(&self) -> &str {
        "command_detect"
    }

    fn stage(&self) -> Stage {
        Stage::Preprocess
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn run(&self, ctx: &Arc<PipelineContext>) -> Result<()> {
        let text = command::command_text(&ctx.message);
        let command = self.registry.parse(&text);
        let has_command = command.is_some();
        if let Some(command) = command {
            tracing::debug!(command = %command.name, message_id = %ctx.message.id, "command detected");
            ctx.set_command(command);
        }

        // Collect-only unless a command was found, the bot was addressed,
        // or an earlier stage already forced the flag.
        if !ctx.collect_only_forced() {
            ctx.set_collect_only(!has_command && !ctx.message.addressed_bot);
        }
        Ok(())
    }
}

/// Executes a detected command during PROCESS.
pub struct CommandExecute {
    registry: Arc<dyn CommandRegistry>,
    hooks: Arc<HookBus>,
}

impl CommandExecute {
    pub fn new(registry: Arc<dyn CommandRegistry>, hooks: Arc<HookBus>) -> Self {
        Self { registry, hooks }
    }
}

#[async_trait]
impl System for CommandExecute {
    fn name(&self) -> &str {
        "command_execute"
    }

    fn stage(&self) -> Stage {
        Stage::Process
    }

    fn priority(&self) -> i32 {
        100
    }

    fn extension_hooks(&self) -> Vec<String> {
        vec![COMMAND_EXECUTED_HOOK.to_string()]
    }

    async fn run(&self, ctx: &Arc<PipelineContext>) -> Result<()> {
        let Some(command) = ctx.command() else {
            return Ok(());
        };
        if let Some(reply) = self.registry.execute(&command, &ctx.message).await? {
            ctx.set_result(reply);
        }
        self.hooks.execute(COMMAND_EXECUTED_HOOK, ctx).await?;
        Ok(())
    }
}

/// Normalizes the prepared result during PREPARE.
pub struct ReplyPrepare;

#[async_trait]
impl System for ReplyPrepare {
    fn name(&self) -> &str {
        "reply_prepare"
    }

    fn stage(&self) -> Stage {
        Stage::Prepare
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn run(&self, ctx: &Arc<PipelineContext>) -> Result<()> {
        if let Some(text) = ctx.result() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                ctx.clear_result();
            } else if trimmed.len() != text.len() {
                ctx.set_result(trimmed.to_string());
            }
        }
        Ok(())
    }
}

/// Delivers the prepared result during SEND.
pub struct ReplySend {
    sink: Arc<dyn ReplySink>,
}

impl ReplySend {
    pub fn new(sink: Arc<dyn ReplySink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl System for ReplySend {
    fn name(&self) -> &str {
        "reply_send"
    }

    fn stage(&self) -> Stage {
        Stage::Send
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn run(&self, ctx: &Arc<PipelineContext>) -> Result<()> {
        if ctx.collect_only() {
            return Ok(());
        }
        let Some(text) = ctx.result() else {
            return Ok(());
        };
        let Some(group_id) = ctx.message.group_id.clone() else {
            return Ok(());
        };
        self.sink.send(&group_id, &text).await
    }
}

/// Records group chatter into the history store during COMPLETE, so the
/// proactive engine has material to analyze.
pub struct HistoryRecord {
    history: SqliteHistory,
}

impl HistoryRecord {
    pub fn new(history: SqliteHistory) -> Self {
        Self { history }
    }
}

#[async_trait]
impl System for HistoryRecord {
    fn name(&self) -> &str {
        "history_record"
    }

    fn stage(&self) -> Stage {
        Stage::Complete
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn run(&self, ctx: &Arc<PipelineContext>) -> Result<()> {
        let Some(group_id) = ctx.message.group_id.clone() else {
            return Ok(());
        };
        self.history
            .record(&group_id, ctx.message.sender_id, &ctx.message.content, false);
        if !ctx.collect_only()
            && let Some(reply) = ctx.result()
        {
            self.history.record(&group_id, crate::BOT_USER_ID, &reply, true);
        }
        Ok(())
    }
}
