//! Relay coordinator for errorcast.
//!
//! Ties the chat transport, the session state machine, the event listener
//! and snapshot persistence into one running service.

/// Relay settings.
pub mod config;
/// Inbound command handling and task supervision.
pub mod coordinator;

pub use config::{snapshot_path_in, RelayConfig, SNAPSHOT_FILE_NAME};
pub use coordinator::{RelayCoordinator, RelayHandle};
