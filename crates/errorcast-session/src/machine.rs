use crate::auth::Authenticator;
use crate::session::{Session, SessionState};
use errorcast_core::{ParseMode, Tier};
use serde::Serialize;
use std::collections::BTreeSet;

const PASSWORD_PROMPT: &str = "Please type access password:";
const WRONG_PASSWORD: &str = "Wrong password :(";
const STOP_LISTENING: &str = "Stop listening to errors";
const LOGGED_OUT: &str = "You successfully logged out. Type password again to log in.";

const COMMANDS_HELP: &str = "List of commands:\n\
`/listen` - Subscribe to all error notifications\n\
`/listen_4xx` - Subscribe to client errors (4xx)\n\
`/listen_5xx` - Subscribe to server errors (5xx)\n\
`/unlisten` (after `/listen`) - Unsubscribe\n\
`/state` - Show current state\n\
`/logout` - Logout";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Classified inbound text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Input {
    /// `/name[@bot] [args...]`; `name` is lower-cased.
    Command { name: String, args: Vec<String> },
    /// A single whitespace-free word that is not a command.
    Token { text: String },
    /// Anything else.
    Text { text: String },
}

impl Input {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let Some(rest) = trimmed.strip_prefix('/') {
            let mut parts = rest.split_whitespace();
            let head = parts.next().unwrap_or_default();
            // Group chats address commands as `/listen@my_bot`.
            let name = head.split('@').next().unwrap_or_default();
            if is_word(name) {
                return Input::Command {
                    name: name.to_lowercase(),
                    args: parts.map(str::to_string).collect(),
                };
            }
        }

        if is_token(trimmed) {
            Input::Token {
                text: trimmed.to_string(),
            }
        } else {
            Input::Text {
                text: trimmed.to_string(),
            }
        }
    }
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

// Passwords may carry punctuation; only a leading slash or whitespace
// disqualifies a token.
fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('/') && !s.chars().any(char::is_whitespace)
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Mutation applied to a session's subscriptions alongside a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    None,
    Subscribe(BTreeSet<Tier>),
    Unsubscribe(BTreeSet<Tier>),
    ClearSubscriptions,
}

/// Text to send back to the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub mode: ParseMode,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: ParseMode::Plain,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: ParseMode::Markdown,
        }
    }
}

/// Result of evaluating one input against a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next_state: SessionState,
    pub reply: Option<Reply>,
    pub effect: SideEffect,
}

impl Transition {
    fn stay(session: &Session, reply: Option<Reply>) -> Self {
        Self {
            next_state: session.state(),
            reply,
            effect: SideEffect::None,
        }
    }

    fn to(next_state: SessionState, reply: Reply, effect: SideEffect) -> Self {
        Self {
            next_state,
            reply: Some(reply),
            effect,
        }
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Pure transition logic for chat sessions.
///
/// [`StateMachine::transition`] never mutates anything; callers commit the
/// returned [`Transition`] with [`Session::commit`].
#[derive(Debug, Clone)]
pub struct StateMachine {
    auth: Authenticator,
}

impl StateMachine {
    pub fn new(auth: Authenticator) -> Self {
        Self { auth }
    }

    pub fn transition(&self, session: &Session, input: &Input) -> Transition {
        use SessionState::{Authorized, Listening, Unauthenticated};

        match (session.state(), input) {
            (_, Input::Command { name, .. }) if name == "state" => {
                Transition::stay(session, Some(Reply::plain(describe_state(session))))
            }
            (_, Input::Command { name, .. }) if name == "debug" => {
                Transition::stay(session, Some(Reply::plain(debug_dump(session, input))))
            }

            (Unauthenticated, Input::Command { name, .. }) if name == "start" => {
                Transition::stay(session, Some(Reply::plain(PASSWORD_PROMPT)))
            }
            (Unauthenticated, Input::Token { text }) => {
                if self.auth.verify(text) {
                    Transition::to(
                        Authorized,
                        Reply::markdown(format!(
                            "You successfully logged in.\n\n{COMMANDS_HELP}"
                        )),
                        SideEffect::None,
                    )
                } else {
                    Transition::stay(session, Some(Reply::plain(WRONG_PASSWORD)))
                }
            }

            (Authorized | Listening, Input::Command { name, .. })
                if name == "start" || name == "help" =>
            {
                Transition::stay(session, Some(Reply::markdown(COMMANDS_HELP)))
            }
            (Authorized | Listening, Input::Command { name, args })
                if name == "listen" || name == "listen_4xx" || name == "listen_5xx" =>
            {
                match requested_tiers(name, args) {
                    Ok(tiers) => {
                        let mut now_listening = session.subscriptions().clone();
                        now_listening.extend(tiers.iter().copied());
                        Transition::to(
                            Listening,
                            Reply::plain(format!(
                                "Listen to errors: {}",
                                join_tiers(&now_listening)
                            )),
                            SideEffect::Subscribe(tiers),
                        )
                    }
                    Err(reply) => Transition::stay(session, Some(reply)),
                }
            }
            (Listening, Input::Command { name, args }) if name == "unlisten" => {
                if args.is_empty() {
                    return Transition::to(
                        Authorized,
                        Reply::plain(STOP_LISTENING),
                        SideEffect::ClearSubscriptions,
                    );
                }
                match parse_tiers(args) {
                    Ok(tiers) => {
                        let remaining: BTreeSet<Tier> =
                            session.subscriptions().difference(&tiers).copied().collect();
                        if remaining.is_empty() {
                            Transition::to(
                                Authorized,
                                Reply::plain(STOP_LISTENING),
                                SideEffect::ClearSubscriptions,
                            )
                        } else {
                            Transition::to(
                                Listening,
                                Reply::plain(format!(
                                    "Stop listening to {}. Still listening to {}",
                                    join_tiers(&tiers),
                                    join_tiers(&remaining)
                                )),
                                SideEffect::Unsubscribe(tiers),
                            )
                        }
                    }
                    Err(reply) => Transition::stay(session, Some(reply)),
                }
            }
            (Authorized | Listening, Input::Command { name, .. }) if name == "logout" => {
                let text = if session.state() == Listening {
                    format!("{STOP_LISTENING}\n{LOGGED_OUT}")
                } else {
                    LOGGED_OUT.to_string()
                };
                Transition::to(
                    Unauthenticated,
                    Reply::plain(text),
                    SideEffect::ClearSubscriptions,
                )
            }

            (_, Input::Command { name, .. }) => Transition::stay(
                session,
                Some(Reply::plain(format!("Unknown command /{name}"))),
            ),
            // Free text is only meaningful as a password attempt.
            (_, Input::Token { .. } | Input::Text { .. }) => Transition::stay(session, None),
        }
    }
}

fn requested_tiers(name: &str, args: &[String]) -> Result<BTreeSet<Tier>, Reply> {
    match name {
        "listen_4xx" => Ok([Tier::ClientError].into()),
        "listen_5xx" => Ok([Tier::ServerError].into()),
        _ if args.is_empty() => Ok(Tier::all()),
        _ => parse_tiers(args),
    }
}

fn parse_tiers(args: &[String]) -> Result<BTreeSet<Tier>, Reply> {
    let mut tiers = BTreeSet::new();
    for arg in args {
        if arg.eq_ignore_ascii_case("all") {
            tiers.extend(Tier::ALL);
            continue;
        }
        match arg.parse::<Tier>() {
            Ok(tier) => {
                tiers.insert(tier);
            }
            Err(_) => {
                return Err(Reply::plain(format!(
                    "Unknown tier '{arg}'. Available tiers: {}",
                    join_tiers(&Tier::all())
                )))
            }
        }
    }
    Ok(tiers)
}

fn join_tiers(tiers: &BTreeSet<Tier>) -> String {
    tiers
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_state(session: &Session) -> String {
    if session.state() == SessionState::Listening {
        format!(
            "{} ({})",
            session.state(),
            join_tiers(session.subscriptions())
        )
    } else {
        session.state().to_string()
    }
}

fn debug_dump(session: &Session, input: &Input) -> String {
    let dump = serde_json::json!({
        "session": session,
        "input": input,
    });
    serde_json::to_string_pretty(&dump).unwrap_or_else(|e| format!("debug dump failed: {e}"))
}
