use crate::machine::{SideEffect, Transition};
use chrono::{DateTime, Utc};
use errorcast_core::{ChatId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Authorization state of a chat session.
///
/// ```text
/// Unauthenticated <-> Authorized <-> Listening
///        ^                               |
///        +-------------------------------+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No valid password has been entered yet.
    #[default]
    Unauthenticated,
    /// Logged in but not receiving notifications.
    Authorized,
    /// Logged in and subscribed to at least one tier.
    Listening,
}

impl SessionState {
    /// Upper-case name shown to users by `/state`.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "UNAUTHENTICATED",
            SessionState::Authorized => "AUTHORIZED",
            SessionState::Listening => "LISTENING",
        }
    }

    /// Whether the shared password has been accepted.
    pub fn is_authorized(self) -> bool {
        !matches!(self, SessionState::Unauthenticated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat identity's authorization and subscription state.
///
/// `state` and `subscriptions` are only changed through [`Session::commit`]
/// and [`Session::unlisten`], which keep `subscriptions` non-empty exactly
/// when the session is [`SessionState::Listening`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: ChatId,
    state: SessionState,
    #[serde(default)]
    subscriptions: BTreeSet<Tier>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: ChatId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SessionState::Unauthenticated,
            subscriptions: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscriptions(&self) -> &BTreeSet<Tier> {
        &self.subscriptions
    }

    /// Whether events of `tier` should be delivered to this session.
    pub fn receives(&self, tier: Tier) -> bool {
        self.state == SessionState::Listening && self.subscriptions.contains(&tier)
    }

    /// Apply a transition computed by the state machine.
    pub fn commit(&mut self, transition: &Transition) {
        match &transition.effect {
            SideEffect::None => {}
            SideEffect::Subscribe(tiers) => self.subscriptions.extend(tiers.iter().copied()),
            SideEffect::Unsubscribe(tiers) => self.subscriptions.retain(|t| !tiers.contains(t)),
            SideEffect::ClearSubscriptions => self.subscriptions.clear(),
        }
        self.state = transition.next_state;
        self.normalize();
        self.updated_at = Utc::now();
    }

    /// Drop every subscription, falling back to `Authorized`.
    ///
    /// Returns `false` when the session was not listening.
    pub fn unlisten(&mut self) -> bool {
        if self.state != SessionState::Listening {
            return false;
        }
        self.subscriptions.clear();
        self.state = SessionState::Authorized;
        self.updated_at = Utc::now();
        true
    }

    /// Whether the subscription invariant holds.
    pub fn is_consistent(&self) -> bool {
        match self.state {
            SessionState::Listening => !self.subscriptions.is_empty(),
            _ => self.subscriptions.is_empty(),
        }
    }

    /// Restore the subscription invariant, returning `true` if anything changed.
    pub fn repair(&mut self) -> bool {
        let before = (self.state, self.subscriptions.len());
        self.normalize();
        before != (self.state, self.subscriptions.len())
    }

    fn normalize(&mut self) {
        match self.state {
            SessionState::Listening if self.subscriptions.is_empty() => {
                self.state = SessionState::Authorized;
            }
            SessionState::Listening => {}
            _ => self.subscriptions.clear(),
        }
    }
}
