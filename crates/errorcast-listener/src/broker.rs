use async_trait::async_trait;
use errorcast_core::{RelayError, RelayResult};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Source of pub/sub subscriptions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a connection and subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> RelayResult<Box<dyn Subscription>>;
}

/// A live subscription to one channel.
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `wait` for the next payload.
    ///
    /// Returns `Ok(None)` when the wait elapsed without a message and an
    /// error when the connection is lost. After an error the subscription is
    /// unusable and must be replaced.
    async fn next_message(&mut self, wait: Duration) -> RelayResult<Option<Vec<u8>>>;
}

/// Redis pub/sub broker.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    /// Validates the URL; no connection is made until [`Broker::subscribe`].
    pub fn new(url: &str) -> RelayResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| RelayError::Broker(format!("Invalid Redis URL: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscribe(&self, channel: &str) -> RelayResult<Box<dyn Subscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::Broker(format!("Redis connect failed: {e}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| RelayError::Broker(format!("Redis subscribe failed: {e}")))?;
        debug!(channel, "Redis subscription established");

        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self, wait: Duration) -> RelayResult<Option<Vec<u8>>> {
        match tokio::time::timeout(wait, self.messages.next()).await {
            Err(_) => Ok(None),
            Ok(Some(msg)) => Ok(Some(msg.get_payload_bytes().to_vec())),
            // The message stream only ends when the connection drops.
            Ok(None) => Err(RelayError::Broker("Redis connection closed".into())),
        }
    }
}
