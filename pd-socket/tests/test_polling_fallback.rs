//! Integration tests for the long-polling fallback.
//!
//! A local axum server refuses the websocket upgrade and speaks Engine.IO
//! long-polling instead: GET without a sid answers the open packet, GET with
//! a sid blocks until the server has packets queued, and POST carries the
//! client's packets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use pd_core::config::TransportKind;
use pd_core::constants::events;
use pd_socket::{ConnectionState, EngineConnector, RealtimeClient, TransportOptions};

const OPEN: &str =
    r#"0{"sid":"eio-poll","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const NOTIFICATION: &str = r#"42["new-notification",{"id":7,"title":"Low stock"}]"#;
const SEPARATOR: char = '\u{1e}';
const WAIT: Duration = Duration::from_secs(5);
const LONG_POLL: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct PollingServer {
    outbox_tx: mpsc::UnboundedSender<String>,
    outbox_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    posted: mpsc::UnboundedSender<String>,
    upgrades_refused: Arc<AtomicUsize>,
}

async fn poll(
    State(server): State<PollingServer>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    match query.get("transport").map(String::as_str) {
        Some("polling") => {}
        Some("websocket") => {
            server.upgrades_refused.fetch_add(1, Ordering::SeqCst);
            return (StatusCode::BAD_REQUEST, "websocket disabled".into());
        }
        _ => return (StatusCode::BAD_REQUEST, "unknown transport".into()),
    }
    if !query.contains_key("sid") {
        return (StatusCode::OK, OPEN.into());
    }

    let mut outbox = server.outbox_rx.lock().await;
    let first = match timeout(LONG_POLL, outbox.recv()).await {
        Ok(Some(packet)) => packet,
        _ => return (StatusCode::OK, "6".into()),
    };
    let mut packets = vec![first];
    while let Ok(packet) = outbox.try_recv() {
        packets.push(packet);
    }
    (StatusCode::OK, packets.join(&SEPARATOR.to_string()))
}

async fn write(State(server): State<PollingServer>, body: String) -> &'static str {
    for packet in body.split(SEPARATOR) {
        let _ = server.posted.send(packet.to_string());
        if packet == "40" {
            let _ = server.outbox_tx.send(r#"40{"sid":"abc"}"#.to_string());
            let _ = server.outbox_tx.send(NOTIFICATION.to_string());
        }
    }
    "ok"
}

/// Start the polling-only server. Returns its address, the packets the
/// client POSTed and the number of refused websocket upgrades.
async fn spawn_polling_server() -> (String, mpsc::UnboundedReceiver<String>, Arc<AtomicUsize>) {
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let (posted_tx, posted_rx) = mpsc::unbounded_channel();
    let upgrades_refused = Arc::new(AtomicUsize::new(0));
    let server = PollingServer {
        outbox_tx,
        outbox_rx: Arc::new(Mutex::new(outbox_rx)),
        posted: posted_tx,
        upgrades_refused: Arc::clone(&upgrades_refused),
    };

    let app = Router::new()
        .route("/socket.io/", get(poll).post(write))
        .with_state(server);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (address, posted_rx, upgrades_refused)
}

fn fallback_options() -> TransportOptions {
    TransportOptions {
        transports: vec![TransportKind::Websocket, TransportKind::Polling],
        timeout: Duration::from_secs(3),
        reconnection_attempts: 2,
        reconnection_delay: Duration::from_millis(50),
        ..TransportOptions::default()
    }
}

fn channel_listener(client: &RealtimeClient, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(event, move |payload: &Value| {
        let _ = tx.send(payload.clone());
    });
    rx
}

async fn wait_for_post(posted: &mut mpsc::UnboundedReceiver<String>, expected: &str) {
    timeout(WAIT, async {
        while let Some(packet) = posted.recv().await {
            if packet == expected {
                return;
            }
        }
        panic!("server stopped before receiving {expected}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for POST {expected}"));
}

#[tokio::test]
async fn refused_websocket_falls_back_to_polling() {
    let (address, mut posted, upgrades_refused) = spawn_polling_server().await;

    let client = Arc::new(RealtimeClient::new(
        fallback_options(),
        Arc::new(EngineConnector::new()),
    ));
    let mut status = channel_listener(&client, events::CONNECTION_STATUS);
    let mut errors = channel_listener(&client, events::CONNECTION_ERROR);
    let mut notifications = channel_listener(&client, events::NEW_NOTIFICATION);
    let weak = Arc::downgrade(&client);
    client.on(events::CONNECTION_STATUS, move |payload: &Value| {
        if payload["connected"] == json!(true) {
            if let Some(client) = weak.upgrade() {
                client.join_store("store-3");
            }
        }
    });

    client.connect(&address).expect("transport should be created");

    let connected = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(connected, json!({"connected": true, "socketId": "abc"}));
    assert!(upgrades_refused.load(Ordering::SeqCst) >= 1);

    let notification = timeout(WAIT, notifications.recv()).await.unwrap().unwrap();
    assert_eq!(notification, json!({"id": 7, "title": "Low stock"}));

    wait_for_post(&mut posted, "40").await;
    wait_for_post(&mut posted, r#"42["join-store","store-3"]"#).await;

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.current_store().as_deref(), Some("store-3"));
    // The websocket refusal is absorbed by the fallback within one attempt.
    assert!(errors.try_recv().is_err());

    client.disconnect();
    wait_for_post(&mut posted, "41").await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn polling_only_connects_without_trying_websocket() {
    let (address, mut posted, upgrades_refused) = spawn_polling_server().await;

    let client = RealtimeClient::new(
        TransportOptions {
            transports: vec![TransportKind::Polling],
            ..fallback_options()
        },
        Arc::new(EngineConnector::new()),
    );
    let mut status = channel_listener(&client, events::CONNECTION_STATUS);
    client.connect(&address).expect("transport should be created");

    let connected = timeout(WAIT, status.recv()).await.unwrap().unwrap();
    assert_eq!(connected["connected"], json!(true));
    wait_for_post(&mut posted, "40").await;
    assert_eq!(upgrades_refused.load(Ordering::SeqCst), 0);

    client.disconnect();
}
