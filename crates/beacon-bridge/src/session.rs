use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_core::NotifierEvent;

use crate::manager::NotifierLifecycleManager;
use crate::ports::Inbound;
use crate::sink::SignalSink;

/// One UI session: a single task owning its lifecycle manager.
///
/// Port frames and lifecycle events are consumed by the same `select!`, so a
/// subscription replacement never interleaves with event handling.
pub struct UiSession<S> {
    manager: NotifierLifecycleManager<S>,
    events: mpsc::UnboundedReceiver<NotifierEvent>,
    inbound: mpsc::Receiver<String>,
    shutdown: CancellationToken,
}

impl<S: SignalSink> UiSession<S> {
    pub fn new(
        manager: NotifierLifecycleManager<S>,
        events: mpsc::UnboundedReceiver<NotifierEvent>,
        inbound: mpsc::Receiver<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            manager,
            events,
            inbound,
            shutdown,
        }
    }

    /// Run until the UI disconnects or the server shuts down.
    pub async fn run(mut self) {
        tracing::info!(session_id = %self.manager.session_id(), "UI session started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = self.inbound.recv() => match frame {
                    Some(text) => self.handle_frame(&text),
                    None => break,
                },
                Some(event) = self.events.recv() => {
                    self.manager.handle_event(event);
                }
            }
        }

        self.manager.shutdown();
        tracing::info!(session_id = %self.manager.session_id(), "UI session ended");
    }

    fn handle_frame(&mut self, text: &str) {
        match Inbound::decode(text) {
            Ok(Inbound::CreateSubscriptions(operations)) => {
                self.manager.handle_subscription_request(operations);
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.manager.session_id(),
                    error = %e,
                    "Ignoring port message"
                );
            }
        }
    }
}
