use async_trait::async_trait;
use errorcast_core::{ChatId, ParseMode, RelayResult};
use serde::{Deserialize, Serialize};

/// Outbound message addressed to one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub chat_id: ChatId,
    pub content: String,
    #[serde(default)]
    pub parse_mode: ParseMode,
}

impl ChannelMessage {
    pub fn new(chat_id: ChatId, content: impl Into<String>, parse_mode: ParseMode) -> Self {
        Self {
            chat_id,
            content: content.into(),
            parse_mode,
        }
    }

    pub fn plain(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::new(chat_id, content, ParseMode::Plain)
    }
}

/// Text received from a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub sender_id: Option<i64>,
    pub text: String,
}

#[derive(Debug)]
pub enum ChannelEvent {
    MessageReceived(InboundMessage),
    Connected(String),
    Disconnected(String),
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one message. A recipient that can no longer be reached is
    /// reported as [`errorcast_core::RelayError::RecipientGone`].
    async fn send(&self, message: ChannelMessage) -> RelayResult<()>;
}
