pub mod logging;
pub mod telegram;

use async_trait::async_trait;

use crate::models::UserId;

/// Outbound channel to the chat front end. Best effort: callers log failures
/// and move on.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, recipient: UserId, text: &str) -> anyhow::Result<()>;
}
