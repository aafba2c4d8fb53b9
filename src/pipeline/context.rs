//! Shared per-run pipeline context.

use super::command::ParsedCommand;
use crate::InboundMessage;
use crate::sync::lock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

const COLLECT_ONLY: &str = "collect_only";

/// Mutable state shared by every stage of one pipeline run: a key/value
/// bag, the original inbound message, the detected command, and the
/// prepared result.
///
/// Interior mutability keeps hook and system signatures simple; no
/// accessor holds a lock across an await point.
pub struct PipelineContext {
    /// The original inbound message.
    pub message: InboundMessage,
    bag: Mutex<HashMap<String, Value>>,
    command: Mutex<Option<ParsedCommand>>,
    result: Mutex<Option<String>>,
}

impl PipelineContext {
    pub fn new(message: InboundMessage) -> Self {
        Self {
            message,
            bag: Mutex::new(HashMap::new()),
            command: Mutex::new(None),
            result: Mutex::new(None),
        }
    }

    /// Store an arbitrary value in the shared bag.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        lock(&self.bag).insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.bag).get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.bag).contains_key(key)
    }

    pub fn set_command(&self, command: ParsedCommand) {
        *lock(&self.command) = Some(command);
    }

    pub fn command(&self) -> Option<ParsedCommand> {
        lock(&self.command).clone()
    }

    pub fn set_result(&self, text: impl Into<String>) {
        *lock(&self.result) = Some(text.into());
    }

    pub fn clear_result(&self) {
        *lock(&self.result) = None;
    }

    pub fn result(&self) -> Option<String> {
        lock(&self.result).clone()
    }

    /// Mark the message collect-only: its context is recorded but no reply
    /// is attempted.
    pub fn set_collect_only(&self, value: bool) {
        self.set(COLLECT_ONLY, Value::Bool(value));
    }

    pub fn collect_only(&self) -> bool {
        matches!(self.get(COLLECT_ONLY), Some(Value::Bool(true)))
    }

    /// Whether any stage has already forced the collect-only flag.
    pub fn collect_only_forced(&self) -> bool {
        self.contains(COLLECT_ONLY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn message() -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            group_id: Some(Arc::from("g1")),
            sender_id: 7,
            content: "hello".into(),
            segments: Vec::new(),
            addressed_bot: false,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn collect_only_defaults_to_unset() {
        let ctx = PipelineContext::new(message());
        assert!(!ctx.collect_only());
        assert!(!ctx.collect_only_forced());

        ctx.set_collect_only(false);
        assert!(!ctx.collect_only());
        // Explicitly set, so later stages must not recompute it.
        assert!(ctx.collect_only_forced());
    }

    #[test]
    fn result_can_be_cleared() {
        let ctx = PipelineContext::new(message());
        ctx.set_result("draft");
        assert_eq!(ctx.result().as_deref(), Some("draft"));
        ctx.clear_result();
        assert!(ctx.result().is_none());
    }
}
