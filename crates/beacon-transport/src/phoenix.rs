//! Absinthe subscriptions over a Phoenix channel socket.
//!
//! One background task owns the websocket. It joins the Absinthe control
//! channel, pushes a `doc` for every live notifier, routes
//! `subscription:data` frames back to observers and reconnects with the
//! Phoenix backoff table when the socket drops. After a reconnect every live
//! notifier is pushed again and receives a fresh Start once acknowledged.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use beacon_core::{
    LifecycleEvent, Notifier, NotifierId, Observer, SubscriptionOperation, Transport, TransportError,
    Variables,
};

use crate::config::{reconnect_delay, TransportConfig};
use crate::frame::{
    Frame, RefCounter, Reply, CONTROL_TOPIC, EVENT_CLOSE, EVENT_DOC, EVENT_ERROR,
    EVENT_SUBSCRIPTION_DATA, EVENT_UNSUBSCRIBE, PHOENIX_TOPIC,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport-side record of one notifier.
struct Entry {
    query: String,
    variables: Variables,
    observer: Option<Observer>,
    /// Events raised before `observe` attached an observer.
    backlog: Vec<LifecycleEvent>,
    /// Server topic, set once the `doc` push is acknowledged.
    subscription_id: Option<String>,
    /// Terminal event queued in the backlog; dropped on observe.
    closed: bool,
}

impl Entry {
    fn new(operation: &SubscriptionOperation, variables: Variables) -> Self {
        Self {
            query: operation.as_str().to_string(),
            variables,
            observer: None,
            backlog: Vec::new(),
            subscription_id: None,
            closed: false,
        }
    }

    fn emit(&mut self, event: LifecycleEvent) {
        match &self.observer {
            Some(observer) => {
                observer.notify(event);
            }
            None => self.backlog.push(event),
        }
    }

    fn doc_payload(&self) -> Value {
        json!({
            "query": self.query,
            "variables": self.variables,
        })
    }
}

#[derive(Default)]
struct Registry {
    entries: HashMap<NotifierId, Entry>,
}

impl Registry {
    fn by_subscription(&mut self, subscription_id: &str) -> Option<&mut Entry> {
        self.entries
            .values_mut()
            .find(|e| e.subscription_id.as_deref() == Some(subscription_id))
    }

    /// Emit a terminal event and forget the notifier once it has been seen.
    fn close(&mut self, id: &NotifierId, event: LifecycleEvent) {
        let Some(entry) = self.entries.get_mut(id) else { return };
        entry.emit(event);
        if entry.observer.is_some() {
            self.entries.remove(id);
        } else {
            entry.closed = true;
        }
    }

    fn fail_all(&mut self, error: &TransportError) {
        for entry in self.entries.values_mut().filter(|e| !e.closed) {
            entry.subscription_id = None;
            entry.emit(LifecycleEvent::Error(error.to_payload()));
        }
    }
}

enum Command {
    Push(NotifierId),
    Unsubscribe(String),
}

/// Absinthe socket client. Connects lazily in the background; work sent
/// before the socket is up is pushed once the control channel is joined.
pub struct PhoenixTransport {
    registry: Arc<Mutex<Registry>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    reconnects: Arc<AtomicU64>,
    shutdown: CancellationToken,
    _task: JoinHandle<()>,
}

impl PhoenixTransport {
    /// Start the socket task. Must be called inside a tokio runtime.
    pub fn connect(config: TransportConfig) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let reconnects = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(connection_loop(
            config,
            Arc::clone(&registry),
            cmd_rx,
            shutdown.clone(),
            Arc::clone(&reconnects),
        ));

        Self {
            registry,
            cmd_tx,
            reconnects,
            shutdown,
            _task: task,
        }
    }

    /// Notifiers the transport is still tracking.
    pub fn tracked_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for PhoenixTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Transport for PhoenixTransport {
    fn name(&self) -> &str {
        "phoenix"
    }

    fn send(&self, operation: &SubscriptionOperation, variables: Variables) -> Notifier {
        let notifier = Notifier::new();
        let id = notifier.id().clone();

        let mut registry = self.registry.lock();
        let mut entry = Entry::new(operation, variables);
        if self.cmd_tx.send(Command::Push(id.clone())).is_err() {
            entry.emit(LifecycleEvent::Error(TransportError::Shutdown.to_payload()));
        }
        registry.entries.insert(id, entry);

        notifier
    }

    fn observe(&self, notifier: &Notifier, observer: Observer) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.entries.get_mut(notifier.id()) else {
            tracing::debug!(notifier_id = %notifier.id(), "Observe on unknown notifier");
            return;
        };

        for event in entry.backlog.drain(..) {
            observer.notify(event);
        }
        entry.observer = Some(observer);

        if entry.closed {
            registry.entries.remove(notifier.id());
        }
    }

    fn cancel(&self, notifier: &Notifier) {
        let Some(mut entry) = self.registry.lock().entries.remove(notifier.id()) else {
            return;
        };

        let payload = json!({ "query": entry.query });
        entry.emit(LifecycleEvent::Cancel(payload));

        if let Some(subscription_id) = entry.subscription_id.take() {
            let _ = self.cmd_tx.send(Command::Unsubscribe(subscription_id));
        }
    }

    fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Protocol state for one socket connection. Pure: every method returns the
/// frames to write instead of writing them.
struct SocketState {
    refs: RefCounter,
    join_ref: String,
    joined: bool,
    pushed: HashSet<NotifierId>,
    pending_docs: HashMap<String, NotifierId>,
    pending_heartbeat: Option<String>,
}

impl SocketState {
    fn new() -> (Self, Frame) {
        let mut refs = RefCounter::default();
        let join_ref = refs.next();
        let join = Frame::join(&join_ref);
        let state = Self {
            refs,
            join_ref,
            joined: false,
            pushed: HashSet::new(),
            pending_docs: HashMap::new(),
            pending_heartbeat: None,
        };
        (state, join)
    }

    fn push_doc(&mut self, id: &NotifierId, registry: &Registry) -> Option<Frame> {
        if self.pushed.contains(id) {
            return None;
        }
        let entry = registry.entries.get(id).filter(|e| !e.closed)?;
        let msg_ref = self.refs.next();
        self.pending_docs.insert(msg_ref.clone(), id.clone());
        self.pushed.insert(id.clone());
        Some(Frame::control_push(&self.join_ref, &msg_ref, EVENT_DOC, entry.doc_payload()))
    }

    fn unsubscribe(&mut self, subscription_id: &str) -> Frame {
        let msg_ref = self.refs.next();
        Frame::control_push(
            &self.join_ref,
            &msg_ref,
            EVENT_UNSUBSCRIBE,
            json!({ "subscriptionId": subscription_id }),
        )
    }

    fn on_command(&mut self, command: Command, registry: &Mutex<Registry>) -> Vec<Frame> {
        // Before the join is acknowledged: pushes go out with the join reply,
        // and server subscriptions from a previous socket no longer exist.
        if !self.joined {
            return Vec::new();
        }
        match command {
            Command::Push(id) => self.push_doc(&id, &registry.lock()).into_iter().collect(),
            Command::Unsubscribe(subscription_id) => vec![self.unsubscribe(&subscription_id)],
        }
    }

    fn on_heartbeat_tick(&mut self, timeout: std::time::Duration) -> Result<Frame, TransportError> {
        if self.pending_heartbeat.is_some() {
            return Err(TransportError::HeartbeatTimeout(timeout));
        }
        let msg_ref = self.refs.next();
        self.pending_heartbeat = Some(msg_ref.clone());
        Ok(Frame::heartbeat(&msg_ref))
    }

    fn on_frame(&mut self, frame: Frame, registry: &Mutex<Registry>) -> Result<Vec<Frame>, TransportError> {
        if let Some(reply) = frame.reply() {
            return self.on_reply(&frame, reply, registry);
        }

        match frame.event.as_str() {
            EVENT_SUBSCRIPTION_DATA => {
                let result = frame.payload.get("result").cloned().unwrap_or(Value::Null);
                let mut registry = registry.lock();
                match registry.by_subscription(&frame.topic) {
                    Some(entry) => entry.emit(LifecycleEvent::Result(result)),
                    None => tracing::debug!(topic = %frame.topic, "Data for unknown subscription"),
                }
            }
            EVENT_ERROR | EVENT_CLOSE if frame.topic == CONTROL_TOPIC => {
                return Err(TransportError::Closed(format!("control channel {}", frame.event)));
            }
            other => tracing::trace!(topic = %frame.topic, event = other, "Ignoring frame"),
        }
        Ok(Vec::new())
    }

    fn on_reply(
        &mut self,
        frame: &Frame,
        reply: Reply,
        registry: &Mutex<Registry>,
    ) -> Result<Vec<Frame>, TransportError> {
        let msg_ref = frame.msg_ref.as_deref();

        if frame.topic == PHOENIX_TOPIC {
            if msg_ref.is_some() && msg_ref == self.pending_heartbeat.as_deref() {
                self.pending_heartbeat = None;
            }
            return Ok(Vec::new());
        }

        if frame.topic == CONTROL_TOPIC && msg_ref == Some(self.join_ref.as_str()) {
            if !reply.ok {
                return Err(TransportError::JoinRejected(reply.response.to_string()));
            }
            self.joined = true;
            let registry = registry.lock();
            let mut ids: Vec<NotifierId> = registry.entries.keys().cloned().collect();
            // NotifierIds are time-ordered; push in creation order.
            ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            let frames = ids.iter().filter_map(|id| self.push_doc(id, &registry)).collect();
            return Ok(frames);
        }

        let Some(id) = msg_ref.and_then(|r| self.pending_docs.remove(r)) else {
            return Ok(Vec::new());
        };

        let mut registry = registry.lock();
        if !registry.entries.contains_key(&id) {
            // Cancelled while the push was in flight.
            let orphan = reply.ok.then(|| reply.subscription_id()).flatten();
            return Ok(orphan.map(|sid| self.unsubscribe(sid)).into_iter().collect());
        }
        if !reply.ok {
            registry.close(&id, LifecycleEvent::Abort(reply.response));
            return Ok(Vec::new());
        }

        if let Some(entry) = registry.entries.get_mut(&id) {
            match reply.subscription_id() {
                Some(subscription_id) => {
                    entry.subscription_id = Some(subscription_id.to_string());
                    entry.emit(LifecycleEvent::Start(reply.response.clone()));
                }
                // Queries and mutations answer inline.
                None => entry.emit(LifecycleEvent::Result(reply.response.clone())),
            }
        }
        Ok(Vec::new())
    }
}

async fn connection_loop(
    config: TransportConfig,
    registry: Arc<Mutex<Registry>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    reconnects: Arc<AtomicU64>,
) {
    let url = config.socket_url();
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        let error = match connected {
            Ok((ws, _)) => {
                attempt = 0;
                tracing::info!(endpoint = %config.socket_endpoint, "Socket connected");
                match run_socket(ws, &config, &registry, &mut cmd_rx, &shutdown).await {
                    Ok(()) => break,
                    Err(e) => {
                        reconnects.fetch_add(1, Ordering::Relaxed);
                        e
                    }
                }
            }
            Err(e) => connect_error(e),
        };

        if !error.is_retryable() {
            tracing::error!(
                error = %error,
                kind = error.error_kind(),
                "Socket transport failed, not reconnecting"
            );
            registry.lock().fail_all(&error);
            break;
        }

        tracing::warn!(
            error = %error,
            kind = error.error_kind(),
            attempt = attempt,
            "Socket unavailable, reconnecting"
        );
        registry.lock().fail_all(&error);

        let delay = reconnect_delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!("Socket transport stopped");
}

/// A malformed socket URL never heals; anything else is worth retrying.
fn connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Url(e) => TransportError::Protocol(format!("invalid socket url: {e}")),
        e => TransportError::ConnectFailed(e.to_string()),
    }
}

async fn run_socket(
    ws: WsStream,
    config: &TransportConfig,
    registry: &Mutex<Registry>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown: &CancellationToken,
) -> Result<(), TransportError> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (mut state, join) = SocketState::new();
    write_frames(&mut ws_tx, vec![join]).await?;

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await; // consume first immediate tick

    loop {
        let frames = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
            cmd = cmd_rx.recv() => {
                // Transport handle dropped.
                let Some(cmd) = cmd else { return Ok(()) };
                state.on_command(cmd, registry)
            }
            _ = heartbeat.tick() => {
                vec![state.on_heartbeat_tick(config.heartbeat_interval)?]
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_else(|| "closed by server".into());
                        return Err(TransportError::Closed(reason));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(TransportError::Closed(e.to_string())),
                    None => return Err(TransportError::Closed("stream ended".into())),
                };
                match Frame::decode(&text) {
                    Ok(frame) => state.on_frame(frame, registry)?,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping undecodable frame");
                        continue;
                    }
                }
            }
        };

        write_frames(&mut ws_tx, frames).await?;
    }
}

async fn write_frames<S>(ws_tx: &mut S, frames: Vec<Frame>) -> Result<(), TransportError>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    for frame in frames {
        tracing::trace!(topic = %frame.topic, event = %frame.event, "Socket push");
        ws_tx
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))?;
    }
    Ok(())
}
