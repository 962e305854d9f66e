use crate::session::Session;
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use errorcast_core::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Durable, point-in-time serialization of the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl SessionSnapshot {
    pub fn new(saved_at: DateTime<Utc>, sessions: Vec<Session>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            sessions,
        }
    }

    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Snapshots written by a newer schema version are rejected.
    pub fn decode(bytes: &[u8]) -> RelayResult<Self> {
        let snapshot: SessionSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| RelayError::Snapshot(format!("Failed to parse snapshot: {e}")))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(RelayError::Snapshot(format!(
                "Unsupported snapshot version {} (expected <= {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

/// Session snapshot stored as a single JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, `Ok(None)` if the file does not exist.
    pub async fn read(&self) -> RelayResult<Option<SessionSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => SessionSnapshot::decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RelayError::Io(e)),
        }
    }

    pub async fn write(&self, snapshot: &SessionSnapshot) -> RelayResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = snapshot.encode()?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(
            path = %self.path.display(),
            sessions = snapshot.sessions.len(),
            "Session snapshot saved"
        );
        Ok(())
    }

    /// Restore `store` from disk. Never fails: a missing or unreadable
    /// snapshot leaves the store empty.
    pub async fn load_into(&self, store: &SessionStore) -> usize {
        match self.read().await {
            Ok(Some(snapshot)) => {
                let count = store.restore(snapshot).await;
                info!(path = %self.path.display(), sessions = count, "Sessions loaded");
                count
            }
            Ok(None) => {
                info!(path = %self.path.display(), "No session snapshot found, starting empty");
                0
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load session snapshot, starting empty"
                );
                0
            }
        }
    }

    /// Snapshot `store` and write it to disk.
    pub async fn save(&self, store: &SessionStore) -> RelayResult<usize> {
        let snapshot = store.snapshot().await;
        self.write(&snapshot).await?;
        Ok(snapshot.sessions.len())
    }
}
