use serde_json::Value;

/// Messages the bridge pushes to the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum UiSignal {
    Connected,
    Reconnecting,
    /// Result body, passed through unmodified.
    DataReceived(Value),
}

impl UiSignal {
    /// Name of the UI port this signal is delivered on.
    pub fn port(&self) -> &'static str {
        match self {
            Self::Connected => "socketStatusConnected",
            Self::Reconnecting => "socketStatusReconnecting",
            Self::DataReceived(_) => "gotSubscriptionData",
        }
    }

    /// Value carried on the port. Status signals carry null.
    pub fn value(&self) -> Value {
        match self {
            Self::Connected | Self::Reconnecting => Value::Null,
            Self::DataReceived(payload) => payload.clone(),
        }
    }
}
