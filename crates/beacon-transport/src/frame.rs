//! Phoenix channel v2 JSON framing: `[join_ref, ref, topic, event, payload]`.

use serde_json::{json, Value};

use beacon_core::TransportError;

pub const CONTROL_TOPIC: &str = "__absinthe__:control";
pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_DOC: &str = "doc";
pub const EVENT_UNSUBSCRIBE: &str = "unsubscribe";
pub const EVENT_SUBSCRIPTION_DATA: &str = "subscription:data";

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl Frame {
    pub fn join(msg_ref: &str) -> Self {
        Self {
            join_ref: Some(msg_ref.to_string()),
            msg_ref: Some(msg_ref.to_string()),
            topic: CONTROL_TOPIC.into(),
            event: EVENT_JOIN.into(),
            payload: json!({}),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            join_ref: None,
            msg_ref: Some(msg_ref.to_string()),
            topic: PHOENIX_TOPIC.into(),
            event: EVENT_HEARTBEAT.into(),
            payload: json!({}),
        }
    }

    /// A push on the joined control channel.
    pub fn control_push(join_ref: &str, msg_ref: &str, event: &str, payload: Value) -> Self {
        Self {
            join_ref: Some(join_ref.to_string()),
            msg_ref: Some(msg_ref.to_string()),
            topic: CONTROL_TOPIC.into(),
            event: event.to_string(),
            payload,
        }
    }

    pub fn encode(&self) -> String {
        json!([self.join_ref, self.msg_ref, self.topic, self.event, self.payload]).to_string()
    }

    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let (join_ref, msg_ref, topic, event, payload): (Option<String>, Option<String>, String, String, Value) =
            serde_json::from_str(text).map_err(|e| TransportError::Protocol(format!("bad frame: {e}")))?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }

    /// Interpret a `phx_reply` payload.
    pub fn reply(&self) -> Option<Reply> {
        if self.event != EVENT_REPLY {
            return None;
        }
        let ok = self.payload.get("status").and_then(Value::as_str) == Some("ok");
        let response = self.payload.get("response").cloned().unwrap_or(Value::Null);
        Some(Reply { ok, response })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub ok: bool,
    pub response: Value,
}

impl Reply {
    pub fn subscription_id(&self) -> Option<&str> {
        self.response.get("subscriptionId").and_then(Value::as_str)
    }
}

/// Monotonic message refs, as strings.
#[derive(Debug, Default)]
pub struct RefCounter(u64);

impl RefCounter {
    pub fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}
