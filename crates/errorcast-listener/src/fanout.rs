use errorcast_channels::{Channel, ChannelMessage};
use errorcast_core::RelayError;
use errorcast_session::SessionStore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Result of delivering one notification to one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed,
    /// The chat is unreachable and its session stopped listening.
    RecipientGone,
}

/// Send `message` once a permit is available.
///
/// Failures stay local to this recipient. A recipient that is gone for good
/// is unsubscribed so later events skip it.
pub async fn deliver(
    transport: Arc<dyn Channel>,
    store: Arc<SessionStore>,
    permits: Arc<Semaphore>,
    message: ChannelMessage,
) -> Delivery {
    // The semaphore is never closed while deliveries are in flight.
    let Ok(_permit) = permits.acquire_owned().await else {
        return Delivery::Failed;
    };

    let chat_id = message.chat_id;
    match transport.send(message).await {
        Ok(()) => {
            debug!(chat_id = %chat_id, "Notification delivered");
            Delivery::Sent
        }
        Err(RelayError::RecipientGone(reason)) => {
            let stopped = store
                .update_existing(chat_id, |session| session.unlisten())
                .await
                .unwrap_or(false);
            info!(chat_id = %chat_id, reason = %reason, stopped, "Recipient gone, unsubscribing");
            Delivery::RecipientGone
        }
        Err(e) => {
            warn!(chat_id = %chat_id, error = %e, "Notification delivery failed");
            Delivery::Failed
        }
    }
}
