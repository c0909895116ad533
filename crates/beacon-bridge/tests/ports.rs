use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use beacon_bridge::{start, ServerConfig, ServerHandle};
use beacon_core::LifecycleEvent;
use beacon_telemetry::MetricsRecorder;
use beacon_transport::MockTransport;

type Ui = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn boot() -> (ServerHandle, Arc<MockTransport>, Arc<MetricsRecorder>) {
    boot_with(ServerConfig::default()).await
}

async fn boot_with(config: ServerConfig) -> (ServerHandle, Arc<MockTransport>, Arc<MetricsRecorder>) {
    let mock = Arc::new(MockTransport::new());
    let metrics = Arc::new(MetricsRecorder::new());
    let config = ServerConfig {
        port: 0,
        backend_endpoint: "http://backend.test".into(),
        ..config
    };
    let handle = start(config, mock.clone(), metrics.clone()).await.unwrap();
    (handle, mock, metrics)
}

async fn connect(port: u16) -> Ui {
    let url = format!("ws://127.0.0.1:{port}/ports");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn next_port_message(ui: &mut Ui) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ui.next())
            .await
            .expect("timed out waiting for port message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn request(ui: &mut Ui, value: Value) {
    let frame = json!({ "port": "createSubscriptions", "value": value }).to_string();
    ui.send(Message::Text(frame.into())).await.unwrap();
}

async fn wait_for_observers(mock: &MockTransport, n: usize) {
    for _ in 0..200 {
        if mock.observer_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {n} observers, have {}", mock.observer_count());
}

async fn wait_for_cancels(mock: &MockTransport, n: usize) {
    for _ in 0..1000 {
        if mock.cancelled().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} cancels, have {}", mock.cancelled().len());
}

/// Next non-text frame: a Close, or None if the socket just went away.
async fn wait_for_close(ui: &mut Ui) -> Option<Message> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ui.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Text(_))) | Some(Ok(Message::Ping(_))) => continue,
            Some(Ok(other)) => return Some(other),
            Some(Err(_)) | None => return None,
        }
    }
}

#[tokio::test]
async fn session_opens_with_flags() {
    let (handle, _mock, _metrics) = boot().await;
    let mut ui = connect(handle.port).await;

    let flags = next_port_message(&mut ui).await;
    assert_eq!(flags["port"], "flags");
    assert_eq!(flags["value"]["backendEndpoint"], "http://backend.test");
    assert!(flags["value"]["authToken"].is_null());

    handle.shutdown().await;
}

#[tokio::test]
async fn stale_results_never_reach_the_ui() {
    let (handle, mock, metrics) = boot().await;
    let mut ui = connect(handle.port).await;
    next_port_message(&mut ui).await; // flags

    request(&mut ui, json!("subscription { opA }")).await;
    wait_for_observers(&mock, 1).await;
    let a = mock.notifier(0).unwrap();

    mock.emit(&a, LifecycleEvent::Start(json!({})));
    mock.emit(&a, LifecycleEvent::Result(json!("x")));
    assert_eq!(
        next_port_message(&mut ui).await,
        json!({"port": "socketStatusConnected", "value": null})
    );
    assert_eq!(
        next_port_message(&mut ui).await,
        json!({"port": "gotSubscriptionData", "value": "x"})
    );

    request(&mut ui, json!(["subscription { opB }"])).await;
    wait_for_observers(&mock, 2).await;
    let b = mock.notifier(1).unwrap();
    assert_eq!(mock.cancelled(), vec![a.clone()]);

    mock.emit(&a, LifecycleEvent::Result(json!("y")));
    mock.emit(&b, LifecycleEvent::Start(json!({})));
    mock.emit(&b, LifecycleEvent::Result(json!("z")));

    assert_eq!(next_port_message(&mut ui).await["port"], "socketStatusConnected");
    assert_eq!(
        next_port_message(&mut ui).await,
        json!({"port": "gotSubscriptionData", "value": "z"})
    );
    assert_eq!(metrics.counter_get("bridge.stale_events", &[]), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn error_reports_reconnecting() {
    let (handle, mock, _metrics) = boot().await;
    let mut ui = connect(handle.port).await;
    next_port_message(&mut ui).await;

    request(&mut ui, json!(["subscription { a }", "subscription { b }"])).await;
    wait_for_observers(&mock, 2).await;

    let a = mock.notifier(0).unwrap();
    mock.emit(&a, LifecycleEvent::Error(json!({"kind": "closed", "reason": "eof"})));
    assert_eq!(
        next_port_message(&mut ui).await,
        json!({"port": "socketStatusReconnecting", "value": null})
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn disconnect_cancels_notifiers() {
    let (handle, mock, metrics) = boot().await;
    let mut ui = connect(handle.port).await;
    next_port_message(&mut ui).await;

    request(&mut ui, json!(["subscription { a }", "subscription { b }"])).await;
    wait_for_observers(&mock, 2).await;

    ui.close(None).await.unwrap();
    for _ in 0..200 {
        if mock.cancelled().len() == 2 && metrics.gauge_get("bridge.active_notifiers", &[]) == 0.0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(mock.cancelled().len(), 2);
    assert_eq!(metrics.gauge_get("bridge.active_notifiers", &[]), 0.0);

    handle.shutdown().await;
}

#[tokio::test]
async fn health_reports_sessions() {
    let (handle, _mock, _metrics) = boot().await;
    let mut ui = connect(handle.port).await;
    next_port_message(&mut ui).await;

    let url = format!("http://127.0.0.1:{}/health", handle.port);
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 1);
    assert!(body["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["name"] == "transport.reconnects"));

    handle.shutdown().await;
}

#[tokio::test]
async fn unresponsive_ui_is_swept_and_its_notifiers_cancelled() {
    let (handle, mock, _metrics) = boot_with(ServerConfig {
        client_timeout: Duration::from_secs(2),
        sweep_interval: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    let mut ui = connect(handle.port).await;
    next_port_message(&mut ui).await;

    request(&mut ui, json!(["subscription { a }", "subscription { b }"])).await;
    wait_for_observers(&mock, 2).await;
    assert!(mock.cancelled().is_empty());

    // No pong arrives before the timeout, so the sweep drops the client.
    wait_for_cancels(&mock, 2).await;
    assert!(matches!(wait_for_close(&mut ui).await, None | Some(Message::Close(_))));

    let url = format!("http://127.0.0.1:{}/health", handle.port);
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["sessions"], 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_ui_sockets() {
    let (handle, mock, _metrics) = boot().await;
    let mut ui = connect(handle.port).await;
    next_port_message(&mut ui).await;

    request(&mut ui, json!("subscription { a }")).await;
    wait_for_observers(&mock, 1).await;

    handle.shutdown().await;
    assert!(matches!(wait_for_close(&mut ui).await, None | Some(Message::Close(_))));
    wait_for_cancels(&mock, 1).await;
}
