//! Integration tests for the Engine.IO transport.
//!
//! A local tokio-tungstenite server plays the notification backend: it sends
//! the engine handshake, acknowledges the namespace connect and then runs a
//! short script of frames.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use pd_core::config::TransportKind;
use pd_core::constants::events;
use pd_socket::{ConnectionState, EngineConnector, RealtimeClient, TransportOptions};

const OPEN: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const WAIT: Duration = Duration::from_secs(5);

/// Accept one websocket client and run `script` after the namespace connect.
/// Every text frame the client sends is forwarded to the returned receiver.
async fn spawn_server(script: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(OPEN.into())).await.unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else { continue };
            let text = text.to_string();
            let _ = frames_tx.send(text.clone());
            if text == "40" {
                for line in &script {
                    if ws.send(Message::Text((*line).into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    (address, frames_rx)
}

/// Accept websocket clients until the test ends. Each connection acknowledges
/// the namespace with its own sid; the first one is dropped as soon as it
/// receives a `join-store`. Frames are forwarded tagged with the connection
/// number, starting at 1.
async fn spawn_dropping_server() -> (String, mpsc::UnboundedReceiver<(usize, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connection += 1;
            let frames_tx = frames_tx.clone();
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                ws.send(Message::Text(OPEN.into())).await.unwrap();

                while let Some(Ok(frame)) = ws.next().await {
                    let Message::Text(text) = frame else { continue };
                    let text = text.to_string();
                    let _ = frames_tx.send((connection, text.clone()));
                    if text == "40" {
                        let ack = format!(r#"40{{"sid":"sock-{connection}"}}"#);
                        if ws.send(Message::Text(ack)).await.is_err() {
                            return;
                        }
                    } else if connection == 1 && text.starts_with(r#"42["join-store""#) {
                        return;
                    }
                }
            });
        }
    });

    (address, frames_rx)
}

fn websocket_options(max_attempts: u32) -> TransportOptions {
    TransportOptions {
        transports: vec![TransportKind::Websocket],
        timeout: Duration::from_secs(2),
        reconnection_attempts: max_attempts,
        reconnection_delay: Duration::from_millis(50),
        ..TransportOptions::default()
    }
}

fn channel_listener(
    client: &RealtimeClient,
    event: &str,
) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(event, move |payload: &Value| {
        let _ = tx.send(payload.clone());
    });
    rx
}

async fn wait_for_frame(frames: &mut mpsc::UnboundedReceiver<String>, expected: &str) {
    timeout(WAIT, async {
        while let Some(frame) = frames.recv().await {
            if frame == expected {
                return;
            }
        }
        panic!("server closed before receiving {expected}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {expected}"));
}

#[tokio::test]
async fn websocket_connect_receives_notification_and_sends_join() {
    let (address, mut frames) = spawn_server(vec![
        r#"40{"sid":"abc"}"#,
        r#"42["new-notification",{"id":1,"title":"Expiring batch"}]"#,
    ])
    .await;

    let client = Arc::new(RealtimeClient::new(
        websocket_options(5),
        Arc::new(EngineConnector::new()),
    ));
    let mut notifications = channel_listener(&client, events::NEW_NOTIFICATION);
    let weak = Arc::downgrade(&client);
    client.on(events::CONNECTION_STATUS, move |payload: &Value| {
        if payload["connected"] == json!(true) {
            if let Some(client) = weak.upgrade() {
                client.join_store("store-1");
            }
        }
    });

    let transport = client.connect(&address).expect("transport should be created");

    let notification = timeout(WAIT, notifications.recv()).await.unwrap().unwrap();
    assert_eq!(notification, json!({"id": 1, "title": "Expiring batch"}));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.connection_status().socket_id.as_deref(), Some("abc"));
    assert_eq!(transport.id().as_deref(), Some("abc"));

    wait_for_frame(&mut frames, "40").await;
    wait_for_frame(&mut frames, r#"42["join-store","store-1"]"#).await;

    client.disconnect();
    wait_for_frame(&mut frames, "41").await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn server_disconnect_is_reported_without_retry() {
    let (address, _frames) = spawn_server(vec![r#"40{"sid":"abc"}"#, "41"]).await;

    let client = RealtimeClient::new(websocket_options(5), Arc::new(EngineConnector::new()));
    let mut status = channel_listener(&client, events::CONNECTION_STATUS);
    client.connect(&address).expect("transport should be created");

    let connected = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(connected, json!({"connected": true, "socketId": "abc"}));

    let dropped = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(
        dropped,
        json!({"connected": false, "reason": "io server disconnect"})
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn namespace_refusal_is_a_connect_error() {
    let (address, _frames) =
        spawn_server(vec![r#"44{"message":"store not authorized"}"#]).await;

    let client = RealtimeClient::new(
        TransportOptions {
            reconnection: false,
            ..websocket_options(5)
        },
        Arc::new(EngineConnector::new()),
    );
    let mut errors = channel_listener(&client, events::CONNECTION_ERROR);
    client.connect(&address).expect("transport should be created");

    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert_eq!(error["attempts"], json!(1));
    assert!(error["error"]
        .as_str()
        .unwrap_or_default()
        .contains("store not authorized"));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_port_ends_in_reconnect_failed() {
    let client = RealtimeClient::new(websocket_options(2), Arc::new(EngineConnector::new()));
    let mut failed = channel_listener(&client, events::RECONNECT_FAILED);
    let mut errors = channel_listener(&client, events::CONNECTION_ERROR);

    client
        .connect("http://127.0.0.1:1")
        .expect("transport should be created");

    let payload = timeout(WAIT, failed.recv()).await.unwrap().unwrap();
    assert_eq!(payload, json!({"maxAttempts": 2}));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert!(!client.connection_status().connected);

    let mut error_count = 0;
    while errors.try_recv().is_ok() {
        error_count += 1;
    }
    assert_eq!(error_count, 2);

    // Nothing more arrives from the abandoned transport.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(failed.try_recv().is_err());
}

#[tokio::test]
async fn invalid_address_fails_construction() {
    let client = RealtimeClient::new(websocket_options(2), Arc::new(EngineConnector::new()));
    assert!(client.connect("ftp://pharmacy.local").is_none());
    assert!(client.connect("not an address").is_none());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropped_connection_reconnects_and_rejoins_store() {
    let (address, mut frames) = spawn_dropping_server().await;

    let client = RealtimeClient::new(websocket_options(5), Arc::new(EngineConnector::new()));
    let mut status = channel_listener(&client, events::CONNECTION_STATUS);
    let mut reconnected = channel_listener(&client, events::RECONNECTED);
    client.connect(&address).expect("transport should be created");

    let connected = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(connected, json!({"connected": true, "socketId": "sock-1"}));
    assert!(client.join_store("store-9"));

    let dropped = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(dropped["connected"], json!(false));

    let back = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(back, json!({"connected": true, "socketId": "sock-2"}));
    let payload = timeout(WAIT, reconnected.recv()).await.unwrap().unwrap();
    assert_eq!(payload, json!({"attempts": 1}));

    let join = r#"42["join-store","store-9"]"#.to_string();
    let mut seen = Vec::new();
    timeout(WAIT, async {
        while let Some(frame) = frames.recv().await {
            let done = frame == (2, join.clone());
            seen.push(frame);
            if done {
                return;
            }
        }
    })
    .await
    .expect("store was not re-joined on the new connection");

    assert_eq!(
        seen,
        vec![
            (1, "40".to_string()),
            (1, join.clone()),
            (2, "40".to_string()),
            (2, join),
        ]
    );
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.current_store().as_deref(), Some("store-9"));
    assert_eq!(client.connection_status().reconnect_attempts, 0);

    client.disconnect();
}
