use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::{prelude::*, types::ParseMode};

/// Outbound channel for reports and operator alerts. Messages are HTML.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str, audience: &[String]) -> Result<()>;
}

pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, message: &str, audience: &[String]) -> Result<()> {
        let text = with_mentions(message, audience);
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .with_context(|| format!("failed to send notification to chat {}", self.chat_id.0))?;
        Ok(())
    }
}

/// Writes notifications to the log when no chat is configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, message: &str, audience: &[String]) -> Result<()> {
        tracing::info!(
            target: "notify",
            audience = audience.len(),
            "{}",
            with_mentions(message, audience)
        );
        Ok(())
    }
}

pub fn with_mentions(message: &str, audience: &[String]) -> String {
    if audience.is_empty() {
        return message.to_string();
    }
    let mentions = audience
        .iter()
        .map(|handle| format!("@{}", handle.replace(' ', "")))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{message} {mentions}")
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
