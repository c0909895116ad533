use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use beacon_core::SessionId;

const PING_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);
/// How long a closed client gets to flush its Close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected UI socket, bound to one session for its whole life.
pub struct Client {
    pub id: ClientId,
    pub session_id: SessionId,
    tx: mpsc::Sender<String>,
    /// Cancelled when the registry drops the client; ends its socket.
    closed: CancellationToken,
    last_pong: AtomicU64,
}

impl Client {
    fn new(
        id: ClientId,
        session_id: SessionId,
        tx: mpsc::Sender<String>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            session_id,
            tx,
            closed,
            last_pong: AtomicU64::new(now_millis()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_millis(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        u128::from(now_millis().saturating_sub(last)) < timeout.as_millis()
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Registry of connected UI sockets.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            timeout: CLIENT_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    /// Clients silent for longer than `timeout` are swept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Close every client's socket when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Register a socket for `session_id`. Returns its id, a sender for the
    /// session's outbound frames and the receiver the socket writer drains.
    pub fn register(
        &self,
        session_id: SessionId,
    ) -> (ClientId, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(
            id.clone(),
            session_id,
            tx.clone(),
            self.shutdown.child_token(),
        ));
        self.clients.insert(id.clone(), client);
        (id, tx, rx)
    }

    /// Forget a client and close its socket.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.closed.cancel();
        }
    }

    /// Queue a frame for one client. Drops it if the queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.clients.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    fn get(&self, client_id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|c| Arc::clone(c.value()))
    }

    /// Drop clients that haven't answered pings within the timeout. Their
    /// sockets close, which ends their sessions.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(self.timeout))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for client in &dead {
            self.unregister(&client.id);
            tracing::info!(
                client_id = %client.id,
                session_id = %client.session_id,
                "Cleaned up dead client"
            );
        }
        dead.len()
    }
}

/// Pump one UI websocket: outbound frames and pings from `rx`, inbound text
/// to `inbound`. Returns once either direction ends or the registry drops
/// the client. Dropping the returned future aborts both directions.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    inbound: mpsc::Sender<String>,
) {
    let Some(client) = registry.get(&client_id) else {
        return;
    };
    let closed = client.closed.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut tasks = JoinSet::new();

    let writer_cid = client_id.clone();
    let writer_closed = closed.clone();
    tasks.spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
                _ = writer_closed.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_client = Arc::clone(&client);
    tasks.spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if inbound.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_client.record_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = tasks.join_next() => {}
        _ = closed.cancelled() => {
            tracing::debug!(client_id = %client_id, "Closing client socket");
            let _ = tokio::time::timeout(CLOSE_GRACE, tasks.join_next()).await;
        }
    }
    tasks.abort_all();

    registry.unregister(&client_id);
}

/// Periodically sweep clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "Dead client cleanup");
            }
        }
    })
}
