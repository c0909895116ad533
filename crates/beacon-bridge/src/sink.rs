use tokio::sync::mpsc;

use beacon_core::UiSignal;

use crate::ports::PortMessage;

/// Outbound side of a UI session. Delivery is fire-and-forget.
pub trait SignalSink: Send {
    fn deliver(&self, signal: UiSignal);
}

/// Encoded port frames for a websocket writer.
impl SignalSink for mpsc::Sender<String> {
    fn deliver(&self, signal: UiSignal) {
        let text = match PortMessage::from_signal(&signal).encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(port = signal.port(), error = %e, "Failed to encode port message");
                return;
            }
        };
        match self.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    port = signal.port(),
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(port = signal.port(), "UI writer gone, dropping message");
            }
        }
    }
}

/// Raw signals, for in-process consumers.
impl SignalSink for mpsc::UnboundedSender<UiSignal> {
    fn deliver(&self, signal: UiSignal) {
        let _ = self.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_sink_encodes_port_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.deliver(UiSignal::DataReceived(json!({"data": {"n": 1}})));

        let text = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["port"], "gotSubscriptionData");
        assert_eq!(value["value"]["data"]["n"], 1);
    }

    #[test]
    fn full_queue_drops() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.deliver(UiSignal::Connected);
        tx.deliver(UiSignal::Reconnecting);

        assert!(rx.try_recv().unwrap().contains("socketStatusConnected"));
        assert!(rx.try_recv().is_err());
    }
}
