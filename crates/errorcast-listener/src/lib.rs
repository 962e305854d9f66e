//! Pub/sub subscriber that relays error events to listening chat sessions.
//!
//! # Main types
//!
//! - [`Broker`] / [`Subscription`]: Boundary to the message broker.
//! - [`RedisBroker`]: Redis pub/sub implementation.
//! - [`Listener`]: Reconnecting subscribe loop with bounded fan-out.
//! - [`ListenerState`]: Observable connection state.

/// Broker abstraction and the Redis implementation.
pub mod broker;
/// Per-recipient delivery tasks.
pub mod fanout;
/// Reconnecting listener loop.
pub mod listener;

pub use broker::{Broker, RedisBroker, Subscription};
pub use fanout::Delivery;
pub use listener::{Listener, ListenerConfig, ListenerState, ListenerStats, ReconnectPolicy};
