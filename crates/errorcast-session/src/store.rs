use crate::session::Session;
use crate::snapshot::SessionSnapshot;
use chrono::Utc;
use errorcast_core::{ChatId, Tier};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Process-wide map of chat sessions.
///
/// Every read-modify-write happens under the write lock, so mutations from
/// the inbound command path and the listener's cleanup path never interleave
/// and a [`SessionStore::snapshot`] never sees a half-applied change.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ChatId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current copy of a session, created in its default state if unknown.
    pub async fn get(&self, id: ChatId) -> Session {
        if let Some(session) = self.sessions.read().await.get(&id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(id)
            .or_insert_with(|| Session::new(id))
            .clone()
    }

    /// Atomically mutate a session, creating it if absent.
    pub async fn apply<F, R>(&self, id: ChatId, mutation: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id).or_insert_with(|| Session::new(id));
        mutation(session)
    }

    /// Atomically mutate a session only if it already exists.
    pub async fn update_existing<F, R>(&self, id: ChatId, mutation: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(&id).map(mutation)
    }

    /// Ids of sessions currently receiving `tier`, in ascending order.
    pub async fn subscribers(&self, tier: Tier) -> Vec<ChatId> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<ChatId> = sessions
            .values()
            .filter(|s| s.receives(tier))
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Consistent point-in-time copy of every session.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let sessions = self.sessions.read().await;
        let mut list: Vec<Session> = sessions.values().cloned().collect();
        list.sort_by_key(|s| s.id);
        SessionSnapshot::new(Utc::now(), list)
    }

    /// Replace the store contents with `snapshot`.
    ///
    /// Records violating the subscription invariant are repaired and later
    /// duplicates of an id replace earlier ones. Returns the number of sessions
    /// restored.
    pub async fn restore(&self, snapshot: SessionSnapshot) -> usize {
        let mut restored = HashMap::with_capacity(snapshot.sessions.len());
        for mut session in snapshot.sessions {
            if session.repair() {
                warn!(chat_id = %session.id, "Repaired inconsistent session record");
            }
            if restored.insert(session.id, session).is_some() {
                warn!("Duplicate session id in snapshot, keeping the last record");
            }
        }
        let count = restored.len();
        *self.sessions.write().await = restored;
        count
    }

    /// Decode and restore a serialized snapshot.
    ///
    /// Malformed data is logged and leaves the store empty.
    pub async fn restore_bytes(&self, bytes: &[u8]) -> usize {
        match SessionSnapshot::decode(bytes) {
            Ok(snapshot) => {
                let count = self.restore(snapshot).await;
                info!(sessions = count, "Session store restored");
                count
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session snapshot, starting empty");
                self.sessions.write().await.clear();
                0
            }
        }
    }
}
