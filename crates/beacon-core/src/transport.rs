use tokio::sync::mpsc;

use crate::events::{LifecycleEvent, NotifierEvent};
use crate::ids::NotifierId;
use crate::operation::{SubscriptionOperation, Variables};

/// Handle for one subscription sent to a transport.
///
/// Usable for `observe`/`cancel` as soon as `send` returns, even before the
/// server has acknowledged anything.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Notifier {
    id: NotifierId,
}

impl Notifier {
    pub fn new() -> Self {
        Self { id: NotifierId::new() }
    }

    pub fn id(&self) -> &NotifierId {
        &self.id
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a notifier's lifecycle callbacks.
///
/// Every event it forwards is tagged with the notifier it was built for, so
/// the consumer can decide whether that notifier is still current.
#[derive(Clone, Debug)]
pub struct Observer {
    notifier: NotifierId,
    tx: mpsc::UnboundedSender<NotifierEvent>,
}

impl Observer {
    pub fn new(notifier: NotifierId, tx: mpsc::UnboundedSender<NotifierEvent>) -> Self {
        Self { notifier, tx }
    }

    pub fn notifier(&self) -> &NotifierId {
        &self.notifier
    }

    /// Forward an event. Returns false once the consumer has gone away.
    pub fn notify(&self, event: LifecycleEvent) -> bool {
        self.tx
            .send(NotifierEvent {
                notifier: self.notifier.clone(),
                event,
            })
            .is_ok()
    }
}

/// Subscription transport over one persistent socket.
///
/// All methods return immediately; the socket I/O behind them happens on the
/// transport's own task and is reported back through observers.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Register an operation for observation and return its handle.
    fn send(&self, operation: &SubscriptionOperation, variables: Variables) -> Notifier;

    /// Attach the observer that receives this notifier's lifecycle events.
    fn observe(&self, notifier: &Notifier, observer: Observer);

    /// Fire-and-forget cancellation.
    fn cancel(&self, notifier: &Notifier);

    /// Times an established socket dropped and the transport began
    /// reconnecting. Failed attempts to connect are not counted.
    fn reconnect_count(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notifiers_are_distinct() {
        assert_ne!(Notifier::new(), Notifier::new());
    }

    #[tokio::test]
    async fn observer_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new();
        let observer = Observer::new(notifier.id().clone(), tx);

        assert!(observer.notify(LifecycleEvent::Result(json!({"n": 1}))));

        let evt = rx.recv().await.unwrap();
        assert_eq!(&evt.notifier, notifier.id());
        assert_eq!(evt.event, LifecycleEvent::Result(json!({"n": 1})));
    }

    #[test]
    fn observer_reports_closed_consumer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Observer::new(NotifierId::new(), tx);
        drop(rx);
        assert!(!observer.notify(LifecycleEvent::Start(serde_json::Value::Null)));
    }
}
