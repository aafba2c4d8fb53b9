//! Reply delivery contract.

use crate::GroupId;
use crate::error::Result;
use async_trait::async_trait;

/// Send primitive for rendered reply text, used by both the proactive
/// engine and the lifecycle pipeline.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, group_id: &GroupId, text: &str) -> Result<()>;
}

/// Sink that logs outbound replies. Used by the CLI dev harness.
pub struct TracingSink;

#[async_trait]
impl ReplySink for TracingSink {
    async fn send(&self, group_id: &GroupId, text: &str) -> Result<()> {
        tracing::info!(group_id = %group_id, %text, "outbound reply");
        Ok(())
    }
}
