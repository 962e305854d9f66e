use crate::{RelayError, RelayResult, Tier};
use serde::{Deserialize, Serialize};

/// An error event published by a monitored server.
///
/// The wire format is a JSON object:
///
/// ```json
/// {"uri": "/api/orders", "content": "...", "content_type": "text/html", "status_code": 500}
/// ```
///
/// `content` may be a string or any structured JSON value. `status_code`
/// accepts a number or a numeric string. An explicit `severity` overrides the
/// tier derived from the status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Request URI that produced the error.
    #[serde(default)]
    pub uri: Option<String>,
    /// Response body (or structured payload).
    pub content: serde_json::Value,
    /// MIME type of `content`.
    #[serde(default)]
    pub content_type: Option<String>,
    /// HTTP status code of the failed response.
    #[serde(default, deserialize_with = "status_code::deserialize")]
    pub status_code: Option<u16>,
    /// Explicit tier, when the publisher classifies the event itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Tier>,
    /// Payload bytes exactly as received from the broker.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Event {
    /// Create an event carrying only a body.
    pub fn new(content: impl Into<serde_json::Value>) -> Self {
        Self {
            uri: None,
            content: content.into(),
            content_type: None,
            status_code: None,
            severity: None,
            raw: Vec::new(),
        }
    }

    /// Set the request URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Set an explicit severity tier.
    pub fn with_severity(mut self, tier: Tier) -> Self {
        self.severity = Some(tier);
        self
    }

    /// Decode a raw broker payload.
    pub fn decode(raw: &[u8]) -> RelayResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| RelayError::MalformedEvent(format!("payload is not UTF-8: {e}")))?;
        let mut event: Event = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedEvent(format!("invalid envelope: {e}")))?;
        if event.content.is_null() {
            return Err(RelayError::MalformedEvent("missing content".to_string()));
        }
        event.raw = raw.to_vec();
        Ok(event)
    }

    /// Serialize the envelope to the wire format.
    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The tier this event is delivered to.
    pub fn severity(&self) -> Tier {
        match (self.severity, self.status_code) {
            (Some(tier), _) => tier,
            (None, Some(status)) => Tier::from_status(status),
            (None, None) => Tier::ServerError,
        }
    }

    /// The body as text: strings verbatim, structured values as compact JSON.
    pub fn content_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

mod status_code {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(n)) => u16::try_from(n)
                .map(Some)
                .map_err(|_| D::Error::custom(format!("status code {n} out of range"))),
            Some(Repr::Text(s)) => s
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid status code '{s}'"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_envelope() {
        let raw = br#"{"uri": "/api/orders", "content": "boom", "content_type": "text/plain", "status_code": 502}"#;
        let event = Event::decode(raw).unwrap();
        assert_eq!(event.uri.as_deref(), Some("/api/orders"));
        assert_eq!(event.content_text(), "boom");
        assert_eq!(event.status_code, Some(502));
        assert_eq!(event.severity(), Tier::ServerError);
        assert_eq!(event.raw, raw.to_vec());
    }

    #[test]
    fn test_decode_string_status_code() {
        let event = Event::decode(br#"{"content": "x", "status_code": "404"}"#).unwrap();
        assert_eq!(event.status_code, Some(404));
        assert_eq!(event.severity(), Tier::ClientError);
    }

    #[test]
    fn test_explicit_severity_wins() {
        let event =
            Event::decode(br#"{"content": "x", "status_code": 500, "severity": "client-error"}"#)
                .unwrap();
        assert_eq!(event.severity(), Tier::ClientError);
    }

    #[test]
    fn test_missing_status_is_server_error() {
        let event = Event::decode(br#"{"content": {"trace": []}}"#).unwrap();
        assert_eq!(event.severity(), Tier::ServerError);
        assert_eq!(event.content_text(), r#"{"trace":[]}"#);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            Event::decode(&[0xff, 0xfe]),
            Err(RelayError::MalformedEvent(_))
        ));
        assert!(matches!(
            Event::decode(b"plain text, not json"),
            Err(RelayError::MalformedEvent(_))
        ));
        assert!(matches!(
            Event::decode(br#"{"uri": "/no-content"}"#),
            Err(RelayError::MalformedEvent(_))
        ));
        assert!(matches!(
            Event::decode(br#"{"content": null}"#),
            Err(RelayError::MalformedEvent(_))
        ));
        assert!(matches!(
            Event::decode(br#"{"content": "x", "status_code": "teapot"}"#),
            Err(RelayError::MalformedEvent(_))
        ));
        assert!(matches!(
            Event::decode(br#"{"content": "x", "status_code": 70000}"#),
            Err(RelayError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_encode_then_decode_keeps_fields() {
        let event = Event::new("body")
            .with_uri("/x")
            .with_content_type("text/plain")
            .with_status(418);
        let decoded = Event::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.uri, event.uri);
        assert_eq!(decoded.status_code, Some(418));
        assert_eq!(decoded.severity(), Tier::ClientError);
    }
}
