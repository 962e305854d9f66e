//! Core types and error definitions for the errorcast relay.
//!
//! This crate provides the foundational types shared across all errorcast
//! crates: the unified error enum, chat identifiers, severity tiers, rendering
//! hints and the decoded [`Event`] envelope published by monitored servers.
//!
//! # Main types
//!
//! - [`RelayError`]: Unified error enum for all errorcast subsystems.
//! - [`RelayResult`]: Convenience alias for `Result<T, RelayError>`.
//! - [`ChatId`]: Opaque identifier of a chat session.
//! - [`Tier`]: Severity category a session can subscribe to.
//! - [`ParseMode`]: How the transport should interpret a message body.
//! - [`Event`]: A decoded error event received from the broker.

/// Error event envelope decoding.
pub mod event;

pub use event::Event;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// --- Error types ---

/// Top-level error type for the errorcast relay.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// An error from the chat transport (HTTP failure, API rejection).
    #[error("Channel error: {0}")]
    Channel(String),

    /// The recipient can no longer be reached (bot blocked, chat deleted).
    #[error("Recipient gone: {0}")]
    RecipientGone(String),

    /// An error from the pub/sub broker connection.
    #[error("Broker error: {0}")]
    Broker(String),

    /// A broker payload that could not be decoded into an [`Event`].
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// An error related to session lookup or mutation.
    #[error("Session error: {0}")]
    Session(String),

    /// An error reading or writing a session snapshot.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

// --- Identity ---

/// Identifier of a chat session, as assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// --- Severity tiers ---

/// A severity category of notification a session can opt into.
///
/// The set is fixed: `client-error` covers HTTP 4xx responses, `server-error`
/// covers 5xx responses and every event that is not a 4xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// HTTP 4xx class errors.
    ClientError,
    /// HTTP 5xx class errors and unclassified failures.
    ServerError,
}

impl Tier {
    /// Every tier, in display order.
    pub const ALL: [Tier; 2] = [Tier::ClientError, Tier::ServerError];

    /// The canonical kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::ClientError => "client-error",
            Tier::ServerError => "server-error",
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        if (400..500).contains(&status) {
            Tier::ClientError
        } else {
            Tier::ServerError
        }
    }

    /// The full tier set.
    pub fn all() -> BTreeSet<Tier> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = RelayError;

    /// Accepts the canonical names plus the `4xx`/`5xx` shorthands.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client-error" | "client_error" | "4xx" => Ok(Tier::ClientError),
            "server-error" | "server_error" | "5xx" => Ok(Tier::ServerError),
            other => Err(RelayError::Session(format!("Unknown tier '{other}'"))),
        }
    }
}

// --- Rendering hints ---

/// How the transport should interpret a message body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Body is sent verbatim.
    #[default]
    Plain,
    /// Body uses (legacy) Markdown markup.
    Markdown,
}
