use crate::channel::{Channel, ChannelEvent, ChannelMessage, InboundMessage};
use async_trait::async_trait;
use errorcast_core::{ChatId, ParseMode, RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API channel adapter.
///
/// Uses the Telegram Bot HTTP API for sending messages and long-polling
/// (`getUpdates`) for receiving them. Incoming messages are forwarded
/// through a `tokio::sync::mpsc` channel as [`ChannelEvent`]s.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
    poll_timeout_secs: u64,
    retry_delay: Duration,
    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
}

// ── Telegram API response types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessagePayload>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessagePayload {
    #[allow(dead_code)]
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

// ── Implementation ──────────────────────────────────────────────────────────

impl TelegramChannel {
    /// Create a new `TelegramChannel`.
    ///
    /// * `bot_token` – The bot token obtained from @BotFather.
    /// * `event_buffer` – Capacity of the internal mpsc event buffer.
    pub fn new(bot_token: impl Into<String>, event_buffer: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let poll_timeout_secs = 30;
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            client: build_client(poll_timeout_secs),
            poll_timeout_secs,
            retry_delay: Duration::from_secs(1),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Point the adapter at another Bot API server (self-hosted or a test mock).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Long-poll timeout passed to `getUpdates`, and the delay before retrying
    /// a failed poll.
    pub fn with_polling(mut self, poll_timeout_secs: u64, retry_delay: Duration) -> Self {
        self.poll_timeout_secs = poll_timeout_secs;
        self.retry_delay = retry_delay;
        self.client = build_client(poll_timeout_secs);
        self
    }

    /// Take the receiving half of the event channel.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    /// Long-poll the Telegram `getUpdates` endpoint until `shutdown` flips to
    /// `true`, its sender is dropped, or the event receiver is dropped.
    ///
    /// Every incoming text message is forwarded as a
    /// [`ChannelEvent::MessageReceived`]. Failed polls are logged and retried
    /// after the configured delay. This should be spawned onto a Tokio task.
    pub async fn poll_updates(&self, mut shutdown: watch::Receiver<bool>) -> RelayResult<()> {
        let mut offset: Option<i64> = None;
        let mut connected = false;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let result = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                result = self.fetch_updates(offset) => result,
            };

            let updates = match result {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram poll failed, retrying");
                    if connected {
                        connected = false;
                        let _ = self
                            .event_tx
                            .send(ChannelEvent::Disconnected(e.to_string()))
                            .await;
                    }
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                    continue;
                }
            };

            if !connected {
                connected = true;
                info!("Telegram polling connected");
                if self
                    .event_tx
                    .send(ChannelEvent::Connected(self.name().to_string()))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }

            for update in updates {
                // Advance the offset so we do not receive this update again.
                offset = Some(update.update_id + 1);

                let Some(msg) = update.message else { continue };
                let Some(text) = msg.text else { continue };

                let inbound = InboundMessage {
                    chat_id: ChatId(msg.chat.id),
                    sender_id: msg.from.map(|u| u.id),
                    text,
                };
                debug!(chat_id = %inbound.chat_id, "Telegram message received");

                // If the receiver is dropped nobody is listening anymore.
                if self
                    .event_tx
                    .send(ChannelEvent::MessageReceived(inbound))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
        }
    }

    async fn fetch_updates(&self, offset: Option<i64>) -> RelayResult<Vec<TelegramUpdate>> {
        let url = self.api_url("getUpdates");

        let mut params: Vec<(&str, String)> = vec![
            ("timeout", self.poll_timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(off) = offset {
            params.push(("offset", off.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| RelayError::Channel(format!("Telegram poll error: {e}")))?;

        let body: TelegramResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| RelayError::Channel(format!("Telegram parse error: {e}")))?;

        if !body.ok {
            return Err(RelayError::Channel(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }

        Ok(body.result.unwrap_or_default())
    }

    async fn send_message(&self, message: &ChannelMessage, parse_mode: ParseMode) -> RelayResult<()> {
        let url = self.api_url("sendMessage");

        let payload = SendMessageRequest {
            chat_id: message.chat_id.0,
            text: &message.content,
            parse_mode: match parse_mode {
                ParseMode::Plain => None,
                ParseMode::Markdown => Some("Markdown"),
            },
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Channel(format!("Telegram send error: {e}")))?;

        let body: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RelayError::Channel(format!("Telegram parse error: {e}")))?;

        if body.ok {
            return Ok(());
        }

        let description = body.description.unwrap_or_default();
        if is_recipient_gone(body.error_code, &description) {
            Err(RelayError::RecipientGone(format!(
                "chat {}: {description}",
                message.chat_id
            )))
        } else {
            Err(RelayError::Channel(format!(
                "Telegram sendMessage failed: {description}"
            )))
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

fn build_client(poll_timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(poll_timeout_secs + 10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn is_recipient_gone(error_code: Option<i64>, description: &str) -> bool {
    let lower = description.to_lowercase();
    error_code == Some(403)
        || lower.contains("chat not found")
        || lower.contains("bot was blocked")
        || lower.contains("user is deactivated")
}

fn is_markup_error(description: &str) -> bool {
    description.to_lowercase().contains("can't parse entities")
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: ChannelMessage) -> errorcast_core::RelayResult<()> {
        match self.send_message(&message, message.parse_mode).await {
            // Broken markup (e.g. a body cut mid-entity) still deserves delivery.
            Err(RelayError::Channel(description))
                if message.parse_mode == ParseMode::Markdown && is_markup_error(&description) =>
            {
                warn!(chat_id = %message.chat_id, "Markdown rejected, resending as plain text");
                self.send_message(&message, ParseMode::Plain).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_gone_classification() {
        assert!(is_recipient_gone(Some(403), "Forbidden: bot was blocked by the user"));
        assert!(is_recipient_gone(Some(400), "Bad Request: chat not found"));
        assert!(!is_recipient_gone(Some(429), "Too Many Requests: retry after 5"));
        assert!(!is_recipient_gone(Some(400), "Bad Request: message is too long"));
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let channel = TelegramChannel::new("TOKEN", 4).with_api_base("http://localhost:8081/");
        assert_eq!(
            channel.api_url("getMe"),
            "http://localhost:8081/botTOKEN/getMe"
        );
    }
}
