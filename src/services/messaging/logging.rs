use async_trait::async_trait;

use super::Dispatcher;
use crate::models::UserId;

/// Writes outgoing messages to the log. Used when no bot token is configured.
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send(&self, recipient: UserId, text: &str) -> anyhow::Result<()> {
        tracing::info!(recipient, text, "notification (log only)");
        Ok(())
    }
}
