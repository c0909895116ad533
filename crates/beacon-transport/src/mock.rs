use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::json;

use beacon_core::{
    LifecycleEvent, Notifier, NotifierId, Observer, SubscriptionOperation, Transport, Variables,
};

/// One `send` call as seen by the mock.
#[derive(Clone, Debug, PartialEq)]
pub struct SentOperation {
    pub notifier: NotifierId,
    pub operation: SubscriptionOperation,
    pub variables: Variables,
}

#[derive(Default)]
struct MockState {
    sent: Vec<SentOperation>,
    cancelled: Vec<NotifierId>,
    observers: HashMap<NotifierId, Observer>,
}

/// In-process transport for deterministic testing without a socket.
///
/// Records every call and lets the test emit lifecycle events for any
/// notifier it has handed out, including ones that were already cancelled.
/// Like the socket transport, `cancel` reports Cancel to an attached observer.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the observer attached to `notifier`.
    /// Returns false if no observer was ever attached or the consumer is gone.
    pub fn emit(&self, notifier: &NotifierId, event: LifecycleEvent) -> bool {
        let state = self.state.lock();
        match state.observers.get(notifier) {
            Some(observer) => observer.notify(event),
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<SentOperation> {
        self.state.lock().sent.clone()
    }

    /// Notifier of the `index`th send, in call order.
    pub fn notifier(&self, index: usize) -> Option<NotifierId> {
        self.state.lock().sent.get(index).map(|s| s.notifier.clone())
    }

    pub fn cancelled(&self) -> Vec<NotifierId> {
        self.state.lock().cancelled.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn send(&self, operation: &SubscriptionOperation, variables: Variables) -> Notifier {
        let notifier = Notifier::new();
        self.state.lock().sent.push(SentOperation {
            notifier: notifier.id().clone(),
            operation: operation.clone(),
            variables,
        });
        notifier
    }

    fn observe(&self, notifier: &Notifier, observer: Observer) {
        self.state
            .lock()
            .observers
            .insert(notifier.id().clone(), observer);
    }

    fn cancel(&self, notifier: &Notifier) {
        let mut state = self.state.lock();
        let id = notifier.id().clone();
        let query = state
            .sent
            .iter()
            .find(|s| s.notifier == id)
            .map(|s| s.operation.to_string())
            .unwrap_or_default();
        if let Some(observer) = state.observers.get(&id) {
            observer.notify(LifecycleEvent::Cancel(json!({ "query": query })));
        }
        state.cancelled.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn records_sends_in_order() {
        let mock = MockTransport::new();
        let a = mock.send(&"subscription { a }".into(), Variables::new());
        let b = mock.send(&"subscription { b }".into(), Variables::new());

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0].notifier, a.id());
        assert_eq!(sent[0].operation.as_str(), "subscription { a }");
        assert_eq!(mock.notifier(1).as_ref(), Some(b.id()));
        assert!(sent[1].variables.is_empty());
    }

    #[test]
    fn records_cancels() {
        let mock = MockTransport::new();
        let a = mock.send(&"subscription { a }".into(), Variables::new());
        mock.cancel(&a);
        assert_eq!(mock.cancelled(), vec![a.id().clone()]);
    }

    #[tokio::test]
    async fn emit_reaches_observer() {
        let mock = MockTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = mock.send(&"subscription { a }".into(), Variables::new());
        mock.observe(&a, Observer::new(a.id().clone(), tx));

        assert!(mock.emit(a.id(), LifecycleEvent::Result(json!({"n": 1}))));
        let evt = rx.recv().await.unwrap();
        assert_eq!(&evt.notifier, a.id());
        assert_eq!(evt.event.payload()["n"], 1);
    }

    #[test]
    fn emit_without_observer_is_false() {
        let mock = MockTransport::new();
        let a = mock.send(&"subscription { a }".into(), Variables::new());
        assert!(!mock.emit(a.id(), LifecycleEvent::Start(json!({}))));
    }

    #[tokio::test]
    async fn cancel_reports_to_observer() {
        let mock = MockTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = mock.send(&"subscription { a }".into(), Variables::new());
        mock.observe(&a, Observer::new(a.id().clone(), tx));
        mock.cancel(&a);

        let evt = rx.recv().await.unwrap();
        assert_eq!(&evt.notifier, a.id());
        assert_eq!(
            evt.event,
            LifecycleEvent::Cancel(json!({"query": "subscription { a }"}))
        );
    }
}
