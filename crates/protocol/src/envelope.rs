//! The JSON envelope exchanged over a WebSocket:
//! `{"event": <string>, "payload": <object>, "ackid": <string?>}`.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── Built-in events ──────────────────────────────────────────────────────────

/// Event names the gateway understands. Unknown events are logged and
/// ignored so producers can extend the set without a fleet upgrade.
pub mod events {
    /// Welcome envelope sent once after a successful upgrade + auth.
    pub const CONNECT: &str = "connect";
    /// Sent once on auth failure, immediately before close.
    pub const ERROR: &str = "event_error";
    /// Application-layer heartbeat from the client.
    pub const PING: &str = "ping";
    /// Reply to `ping`, payload `{"ts": <ms>}`.
    pub const PONG: &str = "pong";
    /// Delivery acknowledgement; reserved, currently a no-op.
    pub const ACK: &str = "ack";
    /// Loopback test event, payload is echoed verbatim.
    pub const ECHO: &str = "echo";
    /// Typing indicator, forwarded peer-to-peer in single chats.
    pub const KEYBOARD: &str = "im.message.keyboard";
    /// A chat message pushed downstream.
    pub const MESSAGE: &str = "im.message";
}

// ── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    /// Opaque producer correlation id, passed through uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ackid: Option<String>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload: normalize(payload),
            ackid: None,
        }
    }

    pub fn with_ackid(mut self, ackid: Option<String>) -> Self {
        self.ackid = ackid.filter(|a| !a.is_empty());
        self
    }

    /// Welcome envelope for a freshly authenticated connection.
    pub fn connect(uid: u64, platform: Platform, ts_ms: u64) -> Self {
        Self::new(
            events::CONNECT,
            serde_json::json!({ "uid": uid, "platform": platform.as_str(), "ts": ts_ms }),
        )
    }

    /// One-shot error envelope sent before closing an unauthenticated socket.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::new(
            events::ERROR,
            serde_json::json!({ "error_code": code, "error_message": message.into() }),
        )
    }

    pub fn pong(ts_ms: u64) -> Self {
        Self::new(events::PONG, serde_json::json!({ "ts": ts_ms }))
    }
}

/// A null payload serializes as `{}` so clients never see `"payload":null`.
fn normalize(payload: Value) -> Value {
    if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    }
}

/// Payload shape of an [`events::ERROR`] envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_code: i32,
    pub error_message: String,
}

// ── Platform tag ─────────────────────────────────────────────────────────────

/// Client platform from the upgrade query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Pc,
    App,
}

impl Platform {
    /// Parse the `platform` query parameter; anything unrecognised (or
    /// absent) is treated as `web`, matching what browser clients send.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "pc" => Self::Pc,
            "app" => Self::App,
            _ => Self::Web,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Pc => "pc",
            Self::App => "app",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let env = Envelope::new("im.message", serde_json::json!({"k": "v"}))
            .with_ackid(Some("a-1".into()));
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn ackid_omitted_when_absent() {
        let env = Envelope::new("pong", serde_json::json!({"ts": 1}));
        let text = serde_json::to_string(&env).unwrap();
        assert!(!text.contains("ackid"));
    }

    #[test]
    fn empty_ackid_treated_as_absent() {
        let env = Envelope::new("x", Value::Null).with_ackid(Some(String::new()));
        assert_eq!(env.ackid, None);
    }

    #[test]
    fn null_payload_becomes_object() {
        let env = Envelope::new("connect", Value::Null);
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"event":"connect","payload":{}}"#);
    }

    #[test]
    fn missing_payload_defaults() {
        let env: Envelope = serde_json::from_str(r#"{"event":"ack"}"#).unwrap();
        assert_eq!(env.event, "ack");
        assert!(env.payload.is_null());
        assert_eq!(env.ackid, None);
    }

    #[test]
    fn platform_tags() {
        assert_eq!(Platform::from_tag("pc"), Platform::Pc);
        assert_eq!(Platform::from_tag("app"), Platform::App);
        assert_eq!(Platform::from_tag(""), Platform::Web);
        assert_eq!(Platform::from_tag("tv"), Platform::Web);
        assert_eq!(serde_json::to_string(&Platform::App).unwrap(), "\"app\"");
    }
}
