//! Engine.IO HTTP long-polling.
//!
//! A background task keeps one GET outstanding and forwards every packet it
//! returns; writes are separate POSTs carrying a payload body.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use pd_core::config::TransportKind;
use pd_core::error::{PdError, PdResult};

use super::engine::{EngineLink, LinkWriter};
use super::packet::{decode_payload, encode_payload, EnginePacket};

/// POST side of a polling link.
pub(crate) struct PollingWriter {
    client: reqwest::Client,
    url: Url,
}

/// Perform the polling handshake and start the GET loop.
pub(crate) async fn open(url: &Url, headers: &HashMap<String, String>) -> PdResult<EngineLink> {
    let client = build_client(headers)?;

    let body = fetch(&client, url).await?;
    let mut packets = decode_payload(&body)?.into_iter();
    let handshake = match packets.next() {
        Some(EnginePacket::Open(handshake)) => handshake,
        other => {
            return Err(PdError::Handshake(format!(
                "expected open packet, got {other:?}"
            )))
        }
    };
    let leftover: Vec<EnginePacket> = packets.collect();

    let mut session_url = url.clone();
    session_url.query_pairs_mut().append_pair("sid", &handshake.sid);

    let (tx, incoming) = mpsc::unbounded_channel();
    for packet in leftover {
        let _ = tx.send(Ok(packet));
    }

    let reader_client = client.clone();
    let reader_url = session_url.clone();
    let reader_task = tokio::spawn(async move {
        loop {
            let packets = match fetch(&reader_client, &reader_url).await {
                Ok(body) => decode_payload(&body),
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            let packets = match packets {
                Ok(packets) => packets,
                Err(e) => {
                    warn!("dropping malformed polling payload: {e}");
                    continue;
                }
            };
            for packet in packets {
                let closing = packet == EnginePacket::Close;
                if tx.send(Ok(packet)).is_err() || closing {
                    return;
                }
            }
        }
    });

    Ok(EngineLink::new(
        TransportKind::Polling,
        handshake,
        incoming,
        LinkWriter::Polling(PollingWriter {
            client,
            url: session_url,
        }),
        reader_task,
    ))
}

impl PollingWriter {
    pub(crate) async fn send(&mut self, packets: Vec<EnginePacket>) -> PdResult<()> {
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(encode_payload(&packets))
            .send()
            .await
            .map_err(|e| PdError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PdError::Http(format!("polling write rejected: {}", response.status())));
        }
        Ok(())
    }
}

fn build_client(headers: &HashMap<String, String>) -> PdResult<reqwest::Client> {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                header_map.insert(name, value);
            }
            _ => warn!("skipping invalid handshake header '{key}'"),
        }
    }

    reqwest::Client::builder()
        .default_headers(header_map)
        .cookie_store(true)
        .build()
        .map_err(|e| PdError::Http(e.to_string()))
}

async fn fetch(client: &reqwest::Client, url: &Url) -> PdResult<String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| PdError::Http(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(PdError::Http(format!("polling request failed: {status}")));
    }
    let body = response.text().await.map_err(|e| PdError::Http(e.to_string()))?;
    debug!("polling received {} byte(s)", body.len());
    Ok(body)
}
