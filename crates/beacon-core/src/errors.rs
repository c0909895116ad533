use std::time::Duration;

use serde_json::{json, Value};

/// Failures of the subscription transport.
/// Classified as retryable (the socket reconnects) or terminal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    // Retryable
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("socket closed: {0}")]
    Closed(String),
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("channel join rejected: {0}")]
    JoinRejected(String),

    // Terminal
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::Closed(_) | Self::HeartbeatTimeout(_) | Self::JoinRejected(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::Closed(_) => "closed",
            Self::HeartbeatTimeout(_) => "heartbeat_timeout",
            Self::JoinRejected(_) => "join_rejected",
            Self::Protocol(_) => "protocol",
            Self::Shutdown => "shutdown",
        }
    }

    /// Payload carried by the Error lifecycle event raised for this failure.
    pub fn to_payload(&self) -> Value {
        json!({
            "kind": self.error_kind(),
            "reason": self.to_string(),
        })
    }
}
