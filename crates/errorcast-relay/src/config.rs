use errorcast_format::DEFAULT_MAX_LEN;
use errorcast_listener::ListenerConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the session snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "sessions.json";

/// Everything the coordinator needs besides its transport and broker.
#[derive(Clone)]
pub struct RelayConfig {
    /// Directory holding the session snapshot.
    pub data_dir: PathBuf,
    /// Shared access password.
    pub password: String,
    /// Period of the background snapshot.
    pub autosave: Duration,
    pub listener: ListenerConfig,
    /// Upper bound on a rendered notification, in characters.
    pub max_message_len: usize,
}

impl RelayConfig {
    pub fn new(data_dir: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            password: password.into(),
            autosave: Duration::from_secs(60),
            listener: ListenerConfig::default(),
            max_message_len: DEFAULT_MAX_LEN,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        snapshot_path_in(&self.data_dir)
    }
}

/// Snapshot location for a given data directory.
pub fn snapshot_path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE_NAME)
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("data_dir", &self.data_dir)
            .field("password", &"<redacted>")
            .field("autosave", &self.autosave)
            .field("listener", &self.listener)
            .field("max_message_len", &self.max_message_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_path() {
        let config = RelayConfig::new("/var/lib/errorcast", "pw");
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/errorcast/sessions.json")
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let config = RelayConfig::new("data", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
