use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::Dispatcher;
use crate::models::UserId;

pub struct TelegramDispatcher {
    api_url: String,
    bot_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: UserId,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramDispatcher {
    pub fn new(api_url: String, bot_token: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Dispatcher for TelegramDispatcher {
    async fn send(&self, recipient: UserId, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);

        self.client
            .post(&url)
            .json(&SendMessage {
                chat_id: recipient,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await
            .context("failed to reach Telegram Bot API")?
            .error_for_status()
            .context("Telegram Bot API returned error")?;

        Ok(())
    }
}
