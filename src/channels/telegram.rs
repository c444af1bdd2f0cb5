//! Telegram alert channel: posts to the Bot API `sendMessage` method.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::config::TelegramConfig;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Delivers alert text somewhere a human will see it.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, text: &str) -> Result<(), ChannelError>;
}

/// `sendMessage` request body.
#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends alerts to a single Telegram chat.
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_url,
            self.config.bot_token.expose_secret()
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    /// Sent as plain text, without `parse_mode`.
    async fn notify(&self, text: &str) -> Result<(), ChannelError> {
        let body = SendMessage {
            chat_id: &self.config.chat_id,
            text: truncate_chars(text, TELEGRAM_MAX_MESSAGE_LENGTH),
        };

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                // reqwest errors include the URL, which carries the token
                reason: e.without_url().to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed ({status}): {err}"),
            });
        }

        tracing::info!(chat_id = %self.config.chat_id, "Telegram alert sent");
        Ok(())
    }
}

/// Build the alert text for a matching message.
pub fn format_alert(label: &str, terms: &[String], subject: &str, link: Option<&str>) -> String {
    let subject = if subject.trim().is_empty() {
        "(no subject)"
    } else {
        subject
    };
    format!(
        "🔔 {label} hit (found: {})\n{subject}\n{}",
        terms.join(", "),
        link.unwrap_or("(no link)")
    )
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
