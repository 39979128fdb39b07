//! Engine.IO v4 and Socket.IO v5 packet codec.
//!
//! Engine.IO frames are a one-digit type followed by data. Long-polling
//! bodies carry several frames separated by the record separator `\x1e`.
//! Socket.IO packets ride inside Engine.IO `message` frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pd_core::error::{PdError, PdResult};

/// Separator between packets in a long-polling payload.
pub const RECORD_SEPARATOR: char = '\x1e';

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                // Handshake only holds strings and integers.
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> PdResult<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| PdError::Protocol("empty engine.io packet".into()))?;
        let data = chars.as_str();
        match kind {
            '0' => {
                let handshake: Handshake = serde_json::from_str(data)
                    .map_err(|e| PdError::Handshake(format!("bad open packet: {e}")))?;
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_string())),
            '3' => Ok(Self::Pong(data.to_string())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(PdError::Protocol("binary engine.io packets are not supported".into())),
            other => Err(PdError::Protocol(format!("unknown engine.io packet type '{other}'"))),
        }
    }
}

/// Join packets into a long-polling body.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

/// Split a long-polling body into packets.
pub fn decode_payload(body: &str) -> PdResult<Vec<EnginePacket>> {
    body.split(RECORD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// One Socket.IO packet on the default namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: request to join the namespace, with optional auth payload.
    /// Server: namespace joined, with the assigned socket id.
    Connect { sid: Option<String>, auth: Option<Value> },
    Disconnect,
    Event { event: String, payload: Value },
    Ack { id: u64, args: Vec<Value> },
    ConnectError { message: String },
}

impl SocketPacket {
    pub fn encode(&self) -> PdResult<String> {
        let encoded = match self {
            Self::Connect { auth: Some(auth), .. } => format!("0{}", serde_json::to_string(auth)?),
            Self::Connect { .. } => "0".to_string(),
            Self::Disconnect => "1".to_string(),
            Self::Event { event, payload } => {
                format!("2{}", serde_json::to_string(&Value::Array(vec![
                    Value::String(event.clone()),
                    payload.clone(),
                ]))?)
            }
            Self::Ack { id, args } => format!("3{id}{}", serde_json::to_string(args)?),
            Self::ConnectError { message } => {
                format!("4{}", serde_json::json!({ "message": message }))
            }
        };
        Ok(encoded)
    }

    pub fn decode(text: &str) -> PdResult<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| PdError::Protocol("empty socket.io packet".into()))?;
        let mut rest = chars.as_str();

        if rest.starts_with('/') {
            let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if namespace != "/" {
                return Err(PdError::Protocol(format!("unsupported namespace {namespace}")));
            }
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (ack_id, body) = rest.split_at(digits);

        match kind {
            '0' => {
                let data: Option<Value> = parse_optional(body)?;
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Self::Connect { sid, auth: None })
            }
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args = match serde_json::from_str::<Value>(body)? {
                    Value::Array(args) => args,
                    other => {
                        return Err(PdError::Protocol(format!("event data is not an array: {other}")))
                    }
                };
                if args.is_empty() {
                    return Err(PdError::Protocol("event without a name".into()));
                }
                let event = match args.remove(0) {
                    Value::String(name) => name,
                    other => return Err(PdError::Protocol(format!("event name is not a string: {other}"))),
                };
                let payload = match args.len() {
                    0 => Value::Null,
                    1 => args.remove(0),
                    _ => Value::Array(args),
                };
                Ok(Self::Event { event, payload })
            }
            '3' => {
                let id = ack_id
                    .parse()
                    .map_err(|_| PdError::Protocol("ack without id".into()))?;
                let args = match parse_optional(body)? {
                    Some(Value::Array(args)) => args,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(Self::Ack { id, args })
            }
            '4' => {
                let message = match parse_optional(body)? {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connection refused")
                        .to_string(),
                    Some(Value::String(message)) => message,
                    _ => "connection refused".to_string(),
                };
                Ok(Self::ConnectError { message })
            }
            '5' | '6' => Err(PdError::Protocol("binary socket.io packets are not supported".into())),
            other => Err(PdError::Protocol(format!("unknown socket.io packet type '{other}'"))),
        }
    }
}

fn parse_optional(body: &str) -> PdResult<Option<Value>> {
    if body.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::from_str(body)?))
    }
}
