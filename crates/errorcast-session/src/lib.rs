//! Chat session state for the errorcast relay.
//!
//! - [`Session`]: one chat's authorization state and subscribed tiers.
//! - [`StateMachine`]: pure transition logic driven by inbound text.
//! - [`SessionStore`]: the process-wide map of sessions behind atomic operations.
//! - [`SessionSnapshot`] / [`SnapshotFile`]: versioned, crash-safe persistence.

/// Shared-password authentication.
pub mod auth;
/// Inbound text classification and the session state machine.
pub mod machine;
/// Session and session state types.
pub mod session;
/// Versioned snapshots and their on-disk file.
pub mod snapshot;
/// In-memory session store.
pub mod store;

pub use auth::Authenticator;
pub use machine::{Input, Reply, SideEffect, StateMachine, Transition};
pub use session::{Session, SessionState};
pub use snapshot::{SessionSnapshot, SnapshotFile, SNAPSHOT_VERSION};
pub use store::SessionStore;
