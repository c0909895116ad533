use serde::{Deserialize, Serialize};
use std::fmt;

/// Variable bindings sent alongside an operation.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Opaque subscription document, as produced by the UI. Never parsed or
/// validated here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionOperation(String);

impl SubscriptionOperation {
    pub fn new(document: impl Into<String>) -> Self {
        Self(document.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionOperation {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SubscriptionOperation {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SubscriptionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
