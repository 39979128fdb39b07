//! Engine.IO over a WebSocket.

use std::collections::HashMap;

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use pd_core::config::TransportKind;
use pd_core::error::{PdError, PdResult};

use super::engine::{EngineLink, LinkWriter};
use super::packet::EnginePacket;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Open a WebSocket and wait for the Engine.IO open packet.
pub(crate) async fn open(url: &Url, headers: &HashMap<String, String>) -> PdResult<EngineLink> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| PdError::WebSocket(format!("bad request for {url}: {e}")))?;

    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                request.headers_mut().insert(name, value);
            }
            _ => warn!("skipping invalid handshake header '{key}'"),
        }
    }

    let (stream, response) = connect_async(request)
        .await
        .map_err(|e| PdError::WebSocket(e.to_string()))?;
    debug!("websocket upgraded (status {})", response.status());

    let (writer, mut reader) = stream.split();

    let handshake = loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                EnginePacket::Open(handshake) => break handshake,
                other => {
                    return Err(PdError::Handshake(format!(
                        "expected open packet, got {other:?}"
                    )))
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(PdError::Handshake("websocket closed before open packet".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(PdError::WebSocket(e.to_string())),
        }
    };

    let (tx, incoming) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            let item = match frame {
                Ok(Message::Text(text)) => EnginePacket::decode(&text),
                Ok(Message::Close(_)) => Err(PdError::Transport("transport close".into())),
                Ok(Message::Binary(_)) => {
                    debug!("ignoring binary websocket frame");
                    continue;
                }
                Ok(_) => continue,
                Err(e) => Err(PdError::WebSocket(e.to_string())),
            };
            let fatal = matches!(item, Err(PdError::Transport(_)) | Err(PdError::WebSocket(_)));
            if tx.send(item).is_err() || fatal {
                return;
            }
        }
        let _ = tx.send(Err(PdError::Transport("transport close".into())));
    });

    Ok(EngineLink::new(
        TransportKind::Websocket,
        handshake,
        incoming,
        LinkWriter::WebSocket(writer),
        reader_task,
    ))
}

/// Write packets as individual text frames.
pub(crate) async fn send(sink: &mut WsSink, packets: Vec<EnginePacket>) -> PdResult<()> {
    for packet in packets {
        sink.send(Message::Text(packet.encode()))
            .await
            .map_err(|e| PdError::WebSocket(e.to_string()))?;
    }
    Ok(())
}

pub(crate) async fn close(sink: &mut WsSink) {
    if let Err(e) = sink.close().await {
        debug!("websocket close: {e}");
    }
}
