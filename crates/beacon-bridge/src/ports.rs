//! JSON frames exchanged with the UI: `{"port": <name>, "value": <json>}`.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use beacon_core::{SubscriptionOperation, UiSignal};

pub const CREATE_SUBSCRIPTIONS: &str = "createSubscriptions";
pub const FLAGS: &str = "flags";

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("malformed port message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown port: {0}")]
    UnknownPort(String),

    #[error("invalid value for {port}: {reason}")]
    InvalidValue { port: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortMessage {
    pub port: String,
    #[serde(default)]
    pub value: Value,
}

impl PortMessage {
    pub fn new(port: impl Into<String>, value: Value) -> Self {
        Self {
            port: port.into(),
            value,
        }
    }

    pub fn from_signal(signal: &UiSignal) -> Self {
        Self::new(signal.port(), signal.value())
    }

    pub fn encode(&self) -> Result<String, PortError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages the UI sends to the bridge.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    CreateSubscriptions(Vec<SubscriptionOperation>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(SubscriptionOperation),
    Many(Vec<SubscriptionOperation>),
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, PortError> {
        let msg: PortMessage = serde_json::from_str(text)?;
        match msg.port.as_str() {
            CREATE_SUBSCRIPTIONS => {
                let ops = serde_json::from_value::<OneOrMany>(msg.value).map_err(|e| {
                    PortError::InvalidValue {
                        port: msg.port.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self::CreateSubscriptions(match ops {
                    OneOrMany::One(op) => vec![op],
                    OneOrMany::Many(ops) => ops,
                }))
            }
            _ => Err(PortError::UnknownPort(msg.port)),
        }
    }
}

/// Page init flags handed to each UI session when it opens.
#[derive(Debug, Default)]
pub struct PageFlags {
    pub backend_endpoint: String,
    pub auth_token: Option<SecretString>,
}

impl PageFlags {
    pub fn to_message(&self) -> PortMessage {
        PortMessage::new(
            FLAGS,
            json!({
                "backendEndpoint": self.backend_endpoint,
                "authToken": self.auth_token.as_ref().map(|t| t.expose_secret()),
            }),
        )
    }
}
