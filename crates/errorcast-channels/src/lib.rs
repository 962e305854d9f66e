//! Chat transport boundary for the errorcast relay.
//!
//! # Main types
//!
//! - [`Channel`]: Trait for sending messages to a chat.
//! - [`ChannelEvent`]: Inbound events produced by a transport.
//! - [`TelegramChannel`]: Telegram Bot API implementation.

/// Core channel trait and message types.
pub mod channel;
/// Telegram channel integration.
pub mod telegram;

pub use channel::{Channel, ChannelEvent, ChannelMessage, InboundMessage};
pub use telegram::TelegramChannel;
