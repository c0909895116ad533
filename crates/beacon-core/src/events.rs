use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::NotifierId;

/// Lifecycle events reported by the transport for one notifier.
///
/// Per-notifier contract: Start precedes any Result, and at most one of
/// Cancel/Abort ends the stream. Error may be followed by a fresh Start once
/// the socket has reconnected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Start(Value),
    Abort(Value),
    Cancel(Value),
    Error(Value),
    Result(Value),
}

impl LifecycleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Abort(_) => "abort",
            Self::Cancel(_) => "cancel",
            Self::Error(_) => "error",
            Self::Result(_) => "result",
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::Start(p) | Self::Abort(p) | Self::Cancel(p) | Self::Error(p) | Self::Result(p) => p,
        }
    }
}

/// A lifecycle event tagged with the notifier it was raised for.
#[derive(Clone, Debug, PartialEq)]
pub struct NotifierEvent {
    pub notifier: NotifierId,
    pub event: LifecycleEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_accessor() {
        let evt = LifecycleEvent::Result(json!({"data": {"moves": []}}));
        assert_eq!(evt.payload()["data"]["moves"], json!([]));
        assert_eq!(evt.event_type(), "result");
    }

    #[test]
    fn serialized_shape() {
        let evt = LifecycleEvent::Start(json!({"subscriptionId": "doc:1"}));
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["payload"]["subscriptionId"], "doc:1");
    }
}
