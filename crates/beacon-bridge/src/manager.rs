//! Notifier lifecycle manager.
//!
//! Keeps the set of observed subscriptions equal to the most recent UI
//! request and relays lifecycle events of current notifiers to the UI.
//! Events are routed by notifier id and re-checked against the current set,
//! so anything from a replaced notifier is dropped here.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use beacon_core::{
    LifecycleEvent, NotifierEvent, NotifierId, Observer, SessionId, SubscriptionOperation,
    Transport, UiSignal, Variables,
};
use beacon_telemetry::MetricsRecorder;

use crate::notifiers::{NotifierSet, NotifierState};
use crate::sink::SignalSink;

/// Cancelled notifiers remembered so their own Cancel is not counted stale.
const RETIRED_LIMIT: usize = 256;

/// What the manager did with one lifecycle event.
#[derive(Clone, Debug, PartialEq)]
pub enum Relay {
    /// Forwarded to the UI.
    Relayed(UiSignal),
    /// No UI effect: a terminal event of a current notifier, or the Cancel
    /// a retired notifier reports after the manager cancelled it.
    Suppressed,
    /// Notifier not in the current set, or already terminal.
    Stale,
}

pub struct NotifierLifecycleManager<S> {
    session_id: SessionId,
    transport: Arc<dyn Transport>,
    notifiers: NotifierSet,
    retired: VecDeque<NotifierId>,
    events_tx: mpsc::UnboundedSender<NotifierEvent>,
    sink: S,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl<S: SignalSink> NotifierLifecycleManager<S> {
    /// Create a manager and the receiver its observers feed.
    pub fn new(
        session_id: SessionId,
        transport: Arc<dyn Transport>,
        sink: S,
    ) -> (Self, mpsc::UnboundedReceiver<NotifierEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            session_id,
            transport,
            notifiers: NotifierSet::new(),
            retired: VecDeque::new(),
            events_tx,
            sink,
            metrics: None,
        };
        (manager, events_rx)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current notifiers, in request order.
    pub fn notifier_ids(&self) -> Vec<NotifierId> {
        self.notifiers.ids()
    }

    pub fn notifier_state(&self, id: &NotifierId) -> Option<NotifierState> {
        self.notifiers.state(id)
    }

    /// Replace every current notifier with one per operation.
    ///
    /// Runs to completion without yielding; nothing observed after it
    /// returns can belong to the previous set.
    pub fn handle_subscription_request(&mut self, operations: Vec<SubscriptionOperation>) {
        let previous = self.cancel_all();

        for operation in &operations {
            let notifier = self.transport.send(operation, Variables::new());
            let id = notifier.id().clone();
            self.notifiers.push(notifier.clone());
            self.transport
                .observe(&notifier, Observer::new(id.clone(), self.events_tx.clone()));
            self.notifiers.transition(&id, NotifierState::Observing);
            tracing::debug!(session_id = %self.session_id, notifier_id = %id, "Observing notifier");
        }

        tracing::info!(
            session_id = %self.session_id,
            cancelled = previous,
            requested = operations.len(),
            transport = self.transport.name(),
            "Subscriptions replaced"
        );

        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("bridge.requests", &[], 1);
            metrics.gauge_inc(
                "bridge.active_notifiers",
                &[],
                operations.len() as f64 - previous as f64,
            );
        }
    }

    /// Relay one lifecycle event if its notifier is current.
    pub fn handle_event(&mut self, event: NotifierEvent) -> Relay {
        let NotifierEvent { notifier, event } = event;

        if matches!(event, LifecycleEvent::Cancel(_)) && self.forget_retired(&notifier) {
            tracing::debug!(
                session_id = %self.session_id,
                notifier_id = %notifier,
                "Subscription cancelled"
            );
            return Relay::Suppressed;
        }

        let state = match self.notifiers.state(&notifier) {
            Some(state) if !state.is_terminal() => state,
            state => {
                tracing::debug!(
                    session_id = %self.session_id,
                    notifier_id = %notifier,
                    event_type = event.event_type(),
                    terminal = state.is_some(),
                    "Dropping stale event"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.counter_inc("bridge.stale_events", &[], 1);
                }
                return Relay::Stale;
            }
        };

        tracing::debug!(
            session_id = %self.session_id,
            notifier_id = %notifier,
            event_type = event.event_type(),
            state = ?state,
            "Lifecycle event"
        );

        let signal = match event {
            LifecycleEvent::Start(_) => UiSignal::Connected,
            LifecycleEvent::Error(payload) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    notifier_id = %notifier,
                    error = %payload,
                    "Subscription interrupted"
                );
                UiSignal::Reconnecting
            }
            LifecycleEvent::Result(payload) => UiSignal::DataReceived(payload),
            LifecycleEvent::Abort(payload) => {
                self.notifiers.transition(&notifier, NotifierState::Aborted);
                tracing::warn!(
                    session_id = %self.session_id,
                    notifier_id = %notifier,
                    reason = %payload,
                    "Subscription aborted"
                );
                return Relay::Suppressed;
            }
            LifecycleEvent::Cancel(_) => {
                self.notifiers.transition(&notifier, NotifierState::Cancelled);
                tracing::debug!(
                    session_id = %self.session_id,
                    notifier_id = %notifier,
                    "Subscription cancelled"
                );
                return Relay::Suppressed;
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("bridge.signals", &[("signal", signal.port())], 1);
        }
        self.sink.deliver(signal.clone());
        Relay::Relayed(signal)
    }

    /// Cancel and forget every notifier. Used at session teardown.
    pub fn shutdown(&mut self) {
        let cancelled = self.cancel_all();
        if let Some(metrics) = &self.metrics {
            metrics.gauge_inc("bridge.active_notifiers", &[], -(cancelled as f64));
        }
        tracing::debug!(session_id = %self.session_id, cancelled, "Manager shut down");
    }

    fn cancel_all(&mut self) -> usize {
        let previous = self.notifiers.take();
        for notifier in &previous {
            if self.retired.len() == RETIRED_LIMIT {
                self.retired.pop_front();
            }
            self.retired.push_back(notifier.id().clone());
            self.transport.cancel(notifier);
            tracing::debug!(
                session_id = %self.session_id,
                notifier_id = %notifier.id(),
                "Cancelled notifier"
            );
        }
        previous.len()
    }

    fn forget_retired(&mut self, id: &NotifierId) -> bool {
        match self.retired.iter().position(|r| r == id) {
            Some(index) => {
                self.retired.remove(index);
                true
            }
            None => false,
        }
    }
}
