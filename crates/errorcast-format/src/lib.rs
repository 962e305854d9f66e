//! Notification formatting for the errorcast relay.
//!
//! [`Formatter::render`] turns a decoded [`Event`] into a [`RenderedMessage`]
//! that the chat transport can send as-is: a body no longer than the
//! configured maximum plus a [`ParseMode`] hint.
//!
//! The payload kind is picked from the event's content type:
//!
//! - `text/html`: tags are stripped (with a structured path for Django debug
//!   pages, see [`html::PageKind`]) and the result is rendered as plain text.
//! - `application/json`: pretty-printed inside a fenced Markdown code block.
//! - anything else: header lines followed by the raw body.

/// HTML error page text extraction.
pub mod html;

use errorcast_core::{Event, ParseMode};
use serde::Serialize;
use tracing::debug;

/// Telegram accepts 4096 characters; the rest is reserved for markup repair.
pub const DEFAULT_MAX_LEN: usize = 4000;

/// Smallest accepted limit, enough for the fence repair suffix.
const MIN_MAX_LEN: usize = 32;

const FENCE_OPEN: &str = "```json\n";
const FENCE_CLOSE: &str = "\n```";
const TRUNCATED_FENCE_CLOSE: &str = "...\n```";

/// A message body ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub body: String,
    pub mode: ParseMode,
}

/// Shape of an event payload, derived from its content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    PlainText,
    Json,
    Html,
}

impl PayloadKind {
    /// Parameters such as `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return PayloadKind::PlainText;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => PayloadKind::Html,
            "application/json" => PayloadKind::Json,
            other if other.ends_with("+json") => PayloadKind::Json,
            _ => PayloadKind::PlainText,
        }
    }
}

/// Renders events into transport-safe message bodies.
#[derive(Debug, Clone)]
pub struct Formatter {
    max_len: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

impl Formatter {
    /// `max_len` is measured in characters.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(MIN_MAX_LEN),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn render(&self, event: &Event) -> RenderedMessage {
        let kind = PayloadKind::from_content_type(event.content_type.as_deref());
        debug!(kind = ?kind, "Rendering event");

        match kind {
            PayloadKind::PlainText => self.render_plain(event, &event.content_text()),
            PayloadKind::Json => self.render_json(event),
            PayloadKind::Html => {
                let text = html::extract_text(&event.content_text());
                self.render_plain(event, &text)
            }
        }
    }

    fn render_plain(&self, event: &Event, body: &str) -> RenderedMessage {
        let headers = make_headers(event, false);
        let text = if headers.is_empty() {
            body.to_string()
        } else {
            format!("{headers}\n{body}")
        };
        RenderedMessage {
            body: truncate_chars(&text, self.max_len).to_string(),
            mode: ParseMode::Plain,
        }
    }

    fn render_json(&self, event: &Event) -> RenderedMessage {
        let value = match &event.content {
            serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(value) => value,
                Err(e) => {
                    debug!(error = %e, "JSON event body does not parse, rendering as text");
                    return self.render_plain(event, s);
                }
            },
            other => other.clone(),
        };

        let Some(pretty) = pretty_json(&value) else {
            return self.render_plain(event, &event.content_text());
        };
        let pretty = break_backtick_runs(&pretty);

        let headers = make_headers(event, true);
        let prefix = if headers.is_empty() {
            String::new()
        } else {
            format!("{headers}\n")
        };
        let body = format!("{prefix}{FENCE_OPEN}{pretty}{FENCE_CLOSE}");

        if body.chars().count() <= self.max_len {
            return RenderedMessage {
                body,
                mode: ParseMode::Markdown,
            };
        }

        let keep = self.max_len - TRUNCATED_FENCE_CLOSE.chars().count();
        let fence_end = prefix.chars().count() + FENCE_OPEN.chars().count();
        if keep < fence_end {
            // Not even the opening fence fits; no block to repair.
            return self.render_plain(event, &pretty);
        }

        let mut clipped = truncate_chars(&body, keep).to_string();
        clipped.push_str(TRUNCATED_FENCE_CLOSE);
        RenderedMessage {
            body: clipped,
            mode: ParseMode::Markdown,
        }
    }
}

/// `Key: value` lines for every envelope field except the body, sorted by key.
fn make_headers(event: &Event, markdown: bool) -> String {
    let mut fields: Vec<(&str, String)> = Vec::new();
    if let Some(content_type) = &event.content_type {
        fields.push(("content_type", content_type.clone()));
    }
    if let Some(status) = event.status_code {
        fields.push(("status_code", status.to_string()));
    }
    if let Some(uri) = &event.uri {
        fields.push(("uri", uri.clone()));
    }
    fields.sort_by(|a, b| a.0.cmp(b.0));

    fields
        .into_iter()
        .map(|(key, value)| {
            let value = if markdown {
                escape_markdown(&value)
            } else {
                value
            };
            format!("{}: {value}", humanize_key(key))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `status_code` -> `Status code`.
fn humanize_key(key: &str) -> String {
    let words = key.split('_').collect::<Vec<_>>().join(" ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Escape the characters legacy Telegram Markdown treats as markup.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Separate adjacent backticks with a zero-width space so no run inside the
/// payload can close the surrounding code block.
fn break_backtick_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '`' && chars.peek() == Some(&'`') {
            out.push('\u{200b}');
        }
    }
    out
}

fn pretty_json(value: &serde_json::Value) -> Option<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer).ok()?;
    String::from_utf8(buf).ok()
}

/// Longest prefix of `s` holding at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
