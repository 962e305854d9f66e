use crate::config::RelayConfig;
use errorcast_channels::{Channel, ChannelEvent, ChannelMessage, InboundMessage};
use errorcast_core::RelayResult;
use errorcast_format::Formatter;
use errorcast_listener::{Broker, Listener, ListenerState, ListenerStats};
use errorcast_session::{Authenticator, Input, SessionStore, SnapshotFile, StateMachine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest accepted autosave period.
const MIN_AUTOSAVE: Duration = Duration::from_millis(10);

/// Owns the session store and wires the chat transport, the state machine,
/// the listener and snapshot persistence together.
///
/// The inbound command loop, the listener and the persistence tick share
/// the store only through its atomic operations.
pub struct RelayCoordinator {
    config: RelayConfig,
    store: Arc<SessionStore>,
    machine: StateMachine,
    snapshot: SnapshotFile,
    transport: Arc<dyn Channel>,
    broker: Arc<dyn Broker>,
}

impl RelayCoordinator {
    pub fn new(config: RelayConfig, transport: Arc<dyn Channel>, broker: Arc<dyn Broker>) -> Self {
        let machine = StateMachine::new(Authenticator::new(&config.password));
        let snapshot = SnapshotFile::new(config.snapshot_path());
        Self {
            config,
            store: Arc::new(SessionStore::new()),
            machine,
            snapshot,
            transport,
            broker,
        }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    /// Load sessions saved by a previous run. A missing or unreadable
    /// snapshot leaves the store empty.
    pub async fn restore(&self) -> usize {
        self.snapshot.load_into(&self.store).await
    }

    /// Run one chat message through the state machine and send the reply.
    ///
    /// The transition is evaluated and committed under a single store
    /// operation. A failed reply is logged; the new state stands.
    pub async fn handle_message(&self, message: InboundMessage) {
        let input = Input::parse(&message.text);
        let chat_id = message.chat_id;

        let (before, transition) = self
            .store
            .apply(chat_id, |session| {
                let before = session.state();
                let transition = self.machine.transition(session, &input);
                session.commit(&transition);
                (before, transition)
            })
            .await;

        if before != transition.next_state {
            info!(
                chat_id = %chat_id,
                from = %before,
                to = %transition.next_state,
                "Session state changed"
            );
        }

        let Some(reply) = transition.reply else {
            debug!(chat_id = %chat_id, "No reply for input");
            return;
        };
        let outbound = ChannelMessage::new(chat_id, reply.text, reply.mode);
        if let Err(e) = self.transport.send(outbound).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to send reply");
        }
    }

    /// Write a snapshot of the store. Failure is logged and returned; the
    /// in-memory store stays authoritative.
    pub async fn persist(&self) -> RelayResult<usize> {
        match self.snapshot.save(&self.store).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(path = %self.snapshot.path().display(), error = %e, "Failed to persist sessions");
                Err(e)
            }
        }
    }

    /// Spawn the inbound loop, the listener and the persistence tick.
    pub fn start(self: Arc<Self>, inbound: mpsc::Receiver<ChannelEvent>) -> RelayHandle {
        let (stop_tx, stop_rx) = watch::channel(false);

        let listener = Listener::new(
            self.config.listener.clone(),
            self.broker.clone(),
            self.store.clone(),
            self.transport.clone(),
            Formatter::new(self.config.max_message_len),
        );
        let listener_state = listener.state();
        let listener_task = {
            let stop = stop_rx.clone();
            tokio::spawn(async move { listener.run(stop).await })
        };

        let tick_task = tokio::spawn(self.clone().persistence_tick(stop_rx.clone()));

        let (closed_tx, inbound_closed) = watch::channel(false);
        let inbound_task = tokio::spawn(self.clone().inbound_loop(inbound, stop_rx, closed_tx));

        info!(
            data_dir = %self.config.data_dir.display(),
            channel = %self.config.listener.channel,
            "Relay started"
        );

        RelayHandle {
            coordinator: self,
            stop_tx,
            listener_state,
            inbound_closed,
            listener_task,
            tick_task,
            inbound_task,
        }
    }

    async fn inbound_loop(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<ChannelEvent>,
        mut stop: watch::Receiver<bool>,
        closed: watch::Sender<bool>,
    ) {
        loop {
            let event = tokio::select! {
                event = inbound.recv() => event,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                    continue;
                }
            };

            match event {
                Some(ChannelEvent::MessageReceived(message)) => self.handle_message(message).await,
                Some(ChannelEvent::Connected(name)) => info!(transport = %name, "Transport connected"),
                Some(ChannelEvent::Disconnected(reason)) => {
                    warn!(reason = %reason, "Transport disconnected");
                }
                None => {
                    warn!("Inbound transport closed");
                    closed.send_replace(true);
                    return;
                }
            }
        }
    }

    async fn persistence_tick(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.autosave.max(MIN_AUTOSAVE));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Ok(count) = self.persist().await {
                        debug!(sessions = count, "Periodic snapshot written");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Running relay returned by [`RelayCoordinator::start`].
pub struct RelayHandle {
    coordinator: Arc<RelayCoordinator>,
    stop_tx: watch::Sender<bool>,
    listener_state: watch::Receiver<ListenerState>,
    inbound_closed: watch::Receiver<bool>,
    listener_task: JoinHandle<ListenerStats>,
    tick_task: JoinHandle<()>,
    inbound_task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn coordinator(&self) -> &Arc<RelayCoordinator> {
        &self.coordinator
    }

    pub fn listener_state(&self) -> watch::Receiver<ListenerState> {
        self.listener_state.clone()
    }

    /// Resolves once the transport stops producing inbound events.
    pub async fn wait_inbound_closed(&self) {
        let mut closed = self.inbound_closed.clone();
        // An error means the inbound loop is gone, which is just as final.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Stop every task, write a final snapshot and return the listener's
    /// counters.
    pub async fn stop(self) -> ListenerStats {
        self.stop_tx.send_replace(true);

        let stats = match self.listener_task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Listener task failed");
                ListenerStats::default()
            }
        };
        if let Err(e) = self.tick_task.await {
            warn!(error = %e, "Persistence task failed");
        }
        if let Err(e) = self.inbound_task.await {
            warn!(error = %e, "Inbound task failed");
        }

        if let Ok(count) = self.coordinator.persist().await {
            info!(sessions = count, "Final snapshot written");
        }
        stats
    }
}
