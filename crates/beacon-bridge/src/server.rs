use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::Instrument;

use beacon_core::{SessionId, Transport};
use beacon_telemetry::{LogQuery, MemoryLogSink, MetricsRecorder, TelemetryGuard};

use crate::client::{self, ClientRegistry};
use crate::manager::NotifierLifecycleManager;
use crate::ports::PageFlags;
use crate::session::UiSession;

/// Inbound port frames buffered per session.
const INBOUND_QUEUE: usize = 64;
/// Retained warnings reported by `/health`.
const HEALTH_LOG_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// UI server configuration.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    /// Page flag: base URL of the backend API, passed through to the UI.
    pub backend_endpoint: String,
    /// Page flag: handed to the UI verbatim.
    pub auth_token: Option<SecretString>,
    /// A UI that leaves pings unanswered this long is disconnected.
    pub client_timeout: Duration,
    /// How often unresponsive UIs are swept.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9092,
            max_send_queue: 256,
            backend_endpoint: "http://localhost:4000".into(),
            auth_token: None,
            client_timeout: client::CLIENT_TIMEOUT,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn Transport>,
    pub client_registry: Arc<ClientRegistry>,
    pub flags: Arc<PageFlags>,
    pub metrics: Arc<MetricsRecorder>,
    pub logs: Option<Arc<MemoryLogSink>>,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ports", get(ports_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind and serve the UI endpoints. Returns once listening.
pub async fn start(
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, BridgeError> {
    serve(config, transport, metrics, None).await
}

/// Like `start`, reporting the process telemetry on `/health`.
pub async fn start_with_telemetry(
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    telemetry: &TelemetryGuard,
) -> Result<ServerHandle, BridgeError> {
    serve(config, transport, telemetry.metrics(), telemetry.logs()).await
}

async fn serve(
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
    logs: Option<Arc<MemoryLogSink>>,
) -> Result<ServerHandle, BridgeError> {
    let shutdown = CancellationToken::new();
    let client_registry = Arc::new(
        ClientRegistry::new(config.max_send_queue)
            .with_timeout(config.client_timeout)
            .with_shutdown(shutdown.clone()),
    );

    let cleanup = client::start_cleanup_task(Arc::clone(&client_registry), config.sweep_interval);

    let state = AppState {
        transport,
        client_registry,
        flags: Arc::new(PageFlags {
            backend_endpoint: config.backend_endpoint,
            auth_token: config.auth_token,
        }),
        metrics,
        logs,
        shutdown: shutdown.clone(),
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| BridgeError::Bind { addr: addr.clone(), source })?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Beacon UI server started");

    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "UI server failed");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`; keeps the background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Close every UI session and stop accepting connections.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.cleanup.abort();
        let _ = self.server.await;
        tracing::info!("Beacon UI server stopped");
    }
}

async fn ports_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One UI socket = one session with its own lifecycle manager.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = SessionId::new();
    let (client_id, outbound, rx) = state.client_registry.register(session_id.clone());
    tracing::info!(client_id = %client_id, session_id = %session_id, "UI client connected");
    state.metrics.gauge_inc("ui.sessions", &[], 1.0);

    match state.flags.to_message().encode() {
        Ok(text) => {
            state.client_registry.send_to(&client_id, text);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode page flags"),
    }

    let span = tracing::info_span!("ui_session", session_id = %session_id);
    let (manager, events) =
        NotifierLifecycleManager::new(session_id, Arc::clone(&state.transport), outbound);
    let manager = manager.with_metrics(Arc::clone(&state.metrics));
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let session = tokio::spawn(
        UiSession::new(manager, events, inbound_rx, state.shutdown.clone())
            .run()
            .instrument(span),
    );

    // Ends on disconnect, on a dead-client sweep and on server shutdown.
    // The session follows once its inbound sender is dropped.
    let registry = Arc::clone(&state.client_registry);
    client::handle_ws_connection(socket, client_id.clone(), rx, registry, inbound_tx).await;

    let _ = session.await;
    state.metrics.gauge_inc("ui.sessions", &[], -1.0);
    tracing::info!(client_id = %client_id, "UI client disconnected");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.gauge_set(
        "transport.reconnects",
        &[],
        state.transport.reconnect_count() as f64,
    );

    let recent_warnings = state.logs.as_ref().map(|logs| {
        logs.query(&LogQuery {
            limit: Some(HEALTH_LOG_LIMIT),
            ..Default::default()
        })
    });

    Json(json!({
        "status": "healthy",
        "transport": state.transport.name(),
        "sessions": state.client_registry.count(),
        "metrics": state.metrics.snapshot(),
        "recent_warnings": recent_warnings,
    }))
}
