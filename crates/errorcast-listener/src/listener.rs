use crate::broker::{Broker, Subscription};
use crate::fanout::{deliver, Delivery};
use errorcast_channels::{Channel, ChannelMessage};
use errorcast_core::Event;
use errorcast_format::Formatter;
use errorcast_session::SessionStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Connection state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Disconnected,
    Connected,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Disconnected => write!(f, "disconnected"),
            ListenerState::Connected => write!(f, "connected"),
        }
    }
}

/// How long to wait before resubscribing after a failure.
///
/// The delay is fixed; every failed attempt waits the same amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { delay_ms: 1000 }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Pub/sub channel carrying the events.
    pub channel: String,
    /// Upper bound on a single poll, and so on shutdown latency.
    pub poll_wait: Duration,
    pub reconnect: ReconnectPolicy,
    /// Deliveries allowed in flight at once.
    pub max_concurrent_sends: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: "errors".to_string(),
            poll_wait: Duration::from_millis(500),
            reconnect: ReconnectPolicy::default(),
            max_concurrent_sends: 8,
        }
    }
}

/// Counters reported when the listener stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    /// Payloads taken off the broker.
    pub received: u64,
    /// Payloads that could not be decoded.
    pub dropped: u64,
    pub deliveries: u64,
    pub failures: u64,
    /// Successful subscriptions after the first one.
    pub reconnects: u64,
}

impl ListenerStats {
    fn record(&mut self, outcome: Delivery) {
        match outcome {
            Delivery::Sent => self.deliveries += 1,
            Delivery::Failed | Delivery::RecipientGone => self.failures += 1,
        }
    }
}

/// Subscribes to the broker and relays every event to the sessions listening
/// to its tier.
///
/// Connection loss is never fatal: the listener drops to
/// [`ListenerState::Disconnected`], waits the [`ReconnectPolicy`] delay and
/// subscribes again until it is told to stop.
pub struct Listener {
    config: ListenerConfig,
    broker: Arc<dyn Broker>,
    store: Arc<SessionStore>,
    transport: Arc<dyn Channel>,
    formatter: Formatter,
    state_tx: watch::Sender<ListenerState>,
}

impl Listener {
    pub fn new(
        config: ListenerConfig,
        broker: Arc<dyn Broker>,
        store: Arc<SessionStore>,
        transport: Arc<dyn Channel>,
        formatter: Formatter,
    ) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Disconnected);
        Self {
            config,
            broker,
            store,
            transport,
            formatter,
            state_tx,
        }
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state_tx.subscribe()
    }

    /// Run until `stop` becomes `true` (or its sender is dropped).
    ///
    /// The stop signal is checked between polls and cuts a reconnect wait
    /// short. Deliveries already dispatched are awaited before returning.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> ListenerStats {
        let mut stats = ListenerStats::default();
        let mut inflight = JoinSet::new();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_sends.max(1)));
        let mut subscribed_before = false;

        info!(channel = %self.config.channel, "Listener starting");

        'connect: while !stop_requested(&stop) {
            let mut subscription = match self.broker.subscribe(&self.config.channel).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_ms = self.config.reconnect.delay_ms,
                        "Subscribe failed, retrying"
                    );
                    if self.wait_or_stop(&mut stop).await {
                        break 'connect;
                    }
                    continue 'connect;
                }
            };

            if subscribed_before {
                stats.reconnects += 1;
            }
            subscribed_before = true;
            self.set_state(ListenerState::Connected);
            info!(channel = %self.config.channel, "Listener connected");

            loop {
                while let Some(joined) = inflight.try_join_next() {
                    record_joined(&mut stats, joined);
                }
                if stop_requested(&stop) {
                    break 'connect;
                }

                match self.poll(subscription.as_mut()).await {
                    Ok(Some(payload)) => {
                        self.fan_out(&payload, &mut inflight, &permits, &mut stats)
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.set_state(ListenerState::Disconnected);
                        warn!(
                            error = %e,
                            retry_ms = self.config.reconnect.delay_ms,
                            "Broker connection lost, reconnecting"
                        );
                        if self.wait_or_stop(&mut stop).await {
                            break 'connect;
                        }
                        continue 'connect;
                    }
                }
            }
        }

        self.set_state(ListenerState::Disconnected);
        while let Some(joined) = inflight.join_next().await {
            record_joined(&mut stats, joined);
        }
        info!(
            received = stats.received,
            dropped = stats.dropped,
            deliveries = stats.deliveries,
            failures = stats.failures,
            reconnects = stats.reconnects,
            "Listener stopped"
        );
        stats
    }

    async fn poll(
        &self,
        subscription: &mut dyn Subscription,
    ) -> errorcast_core::RelayResult<Option<Vec<u8>>> {
        subscription.next_message(self.config.poll_wait).await
    }

    /// Decode, render once and dispatch one delivery task per recipient.
    async fn fan_out(
        &self,
        payload: &[u8],
        inflight: &mut JoinSet<Delivery>,
        permits: &Arc<Semaphore>,
        stats: &mut ListenerStats,
    ) {
        stats.received += 1;

        let event = match Event::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                stats.dropped += 1;
                warn!(error = %e, bytes = payload.len(), "Dropping malformed event");
                return;
            }
        };

        let tier = event.severity();
        let recipients = self.store.subscribers(tier).await;
        if recipients.is_empty() {
            debug!(tier = %tier, "No sessions listening");
            return;
        }

        let rendered = self.formatter.render(&event);
        debug!(tier = %tier, recipients = recipients.len(), "Dispatching event");

        for chat_id in recipients {
            let message = ChannelMessage::new(chat_id, rendered.body.clone(), rendered.mode);
            inflight.spawn(deliver(
                self.transport.clone(),
                self.store.clone(),
                permits.clone(),
                message,
            ));
        }
    }

    /// Sleep the reconnect delay; `true` if stop was requested meanwhile.
    async fn wait_or_stop(&self, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect.delay()) => stop_requested(stop),
            changed = stop.changed() => changed.is_err() || *stop.borrow(),
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// A dropped sender counts as a stop request.
fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

fn record_joined(stats: &mut ListenerStats, joined: Result<Delivery, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => stats.record(outcome),
        Err(e) => {
            warn!(error = %e, "Delivery task panicked");
            stats.failures += 1;
        }
    }
}
