use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use beacon_core::{
    LifecycleEvent, NotifierEvent, Observer, SubscriptionOperation, Transport, Variables,
};
use beacon_transport::frame::{Frame, EVENT_DOC, EVENT_JOIN, EVENT_REPLY, EVENT_SUBSCRIPTION_DATA};
use beacon_transport::{PhoenixTransport, TransportConfig};

/// Minimal Absinthe endpoint: acknowledges the join and one `doc`, pushes a
/// single result, then closes the socket. Each connection gets its own
/// subscription id.
async fn serve(listener: TcpListener) {
    let mut connection = 0u64;
    while let Ok((stream, _)) = listener.accept().await {
        connection += 1;
        tokio::spawn(serve_connection(stream, connection));
    }
}

async fn serve_connection(stream: TcpStream, connection: u64) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let subscription_id = format!("__absinthe__:doc:{connection}");

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = Frame::decode(&text) else { continue };
        match frame.event.as_str() {
            EVENT_JOIN => {
                let _ = ws.send(reply(&frame, json!({}))).await;
            }
            EVENT_DOC => {
                let _ = ws
                    .send(reply(&frame, json!({ "subscriptionId": subscription_id })))
                    .await;
                let data = Frame {
                    join_ref: None,
                    msg_ref: None,
                    topic: subscription_id.clone(),
                    event: EVENT_SUBSCRIPTION_DATA.into(),
                    payload: json!({
                        "result": { "data": { "connection": connection } },
                        "subscriptionId": subscription_id,
                    }),
                };
                let _ = ws.send(Message::Text(data.encode().into())).await;
                let _ = ws.close(None).await;
                return;
            }
            _ => {}
        }
    }
}

fn reply(to: &Frame, response: Value) -> Message {
    let frame = Frame {
        join_ref: to.join_ref.clone(),
        msg_ref: to.msg_ref.clone(),
        topic: to.topic.clone(),
        event: EVENT_REPLY.into(),
        payload: json!({ "status": "ok", "response": response }),
    };
    Message::Text(frame.encode().into())
}

async fn next(rx: &mut mpsc::UnboundedReceiver<NotifierEvent>) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for lifecycle event")
        .expect("observer channel closed")
        .event
}

#[tokio::test]
async fn dropped_socket_counts_one_reconnect_and_resubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve(listener));

    let transport = PhoenixTransport::connect(TransportConfig {
        socket_endpoint: format!("ws://127.0.0.1:{port}"),
        ..Default::default()
    });
    let notifier = transport.send(&SubscriptionOperation::new("subscription { board }"), Variables::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.observe(&notifier, Observer::new(notifier.id().clone(), tx));

    assert_eq!(
        next(&mut rx).await,
        LifecycleEvent::Start(json!({ "subscriptionId": "__absinthe__:doc:1" }))
    );
    assert_eq!(
        next(&mut rx).await,
        LifecycleEvent::Result(json!({ "data": { "connection": 1 } }))
    );
    assert_eq!(transport.reconnect_count(), 0);

    let error = next(&mut rx).await;
    assert_eq!(error.event_type(), "error");
    assert_eq!(error.payload()["kind"], "closed");
    assert_eq!(transport.reconnect_count(), 1);

    // The live notifier is pushed again on the new socket.
    assert_eq!(
        next(&mut rx).await,
        LifecycleEvent::Start(json!({ "subscriptionId": "__absinthe__:doc:2" }))
    );
    assert_eq!(
        next(&mut rx).await,
        LifecycleEvent::Result(json!({ "data": { "connection": 2 } }))
    );

    transport.shutdown();
}

#[tokio::test]
async fn token_reaches_the_server_intact() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (uri_tx, mut uri_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(request.uri().to_string());
            Ok(response)
        };
        let _ = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    });

    let transport = PhoenixTransport::connect(TransportConfig {
        socket_endpoint: format!("http://127.0.0.1:{port}"),
        auth_token: Some(SecretString::from("a&b=c+d")),
        ..Default::default()
    });

    let uri = tokio::time::timeout(Duration::from_secs(5), uri_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uri, "/socket/websocket?vsn=2.0.0&token=a%26b%3Dc%2Bd");

    transport.shutdown();
}
