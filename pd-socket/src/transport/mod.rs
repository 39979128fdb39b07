//! Transport abstraction.
//!
//! A transport carries bytes to and from the notification server and reports
//! lifecycle events back to the client through a [`TransportSink`]. The
//! client owns at most one live transport; every transport is stamped with a
//! generation number so that events from a replaced transport are ignored.

pub mod engine;
pub mod packet;
mod polling;
mod websocket;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;

use pd_core::config::{RealtimeConfig, TransportKind};
use pd_core::error::PdResult;

pub use engine::EngineConnector;

/// Lifecycle and data events produced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Namespace connected; `socket_id` is the server-assigned id.
    Connect { socket_id: String },
    /// An established connection was lost.
    Disconnect { reason: String },
    /// A connection attempt failed.
    ConnectError { error: String },
    /// Connection re-established after `attempt` retries.
    Reconnect { attempt: u32 },
    /// A retry failed.
    ReconnectError { error: String },
    /// The transport stopped retrying.
    ReconnectFailed,
    /// Application event pushed by the server.
    Message { event: String, payload: Value },
}

impl TransportEvent {
    /// Short name used in logs.
    pub fn label(&self) -> &str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::ConnectError { .. } => "connect_error",
            Self::Reconnect { .. } => "reconnect",
            Self::ReconnectError { .. } => "reconnect_error",
            Self::ReconnectFailed => "reconnect_failed",
            Self::Message { event, .. } => event.as_str(),
        }
    }
}

/// Receiver of transport events, implemented by the client.
pub trait TransportEventHandler: Send + Sync {
    fn handle_transport_event(&self, generation: u64, event: TransportEvent);
}

/// Handle a transport uses to report events.
///
/// Holds only a weak reference: a transport that outlives its client
/// delivers into the void.
#[derive(Clone)]
pub struct TransportSink {
    handler: Weak<dyn TransportEventHandler>,
    generation: u64,
}

impl TransportSink {
    pub fn new(handler: Weak<dyn TransportEventHandler>, generation: u64) -> Self {
        Self { handler, generation }
    }

    /// Generation of the transport this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns false if the client is gone.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        match self.handler.upgrade() {
            Some(handler) => {
                handler.handle_transport_event(self.generation, event);
                true
            }
            None => false,
        }
    }
}

/// A live connection to the notification server.
pub trait Transport: Send + Sync {
    /// Server-assigned socket id, once connected.
    fn id(&self) -> Option<String>;

    /// Send `payload` under `event`. Must not block.
    fn send(&self, event: &str, payload: Value) -> PdResult<()>;

    /// Tear the transport down. Pending reconnection attempts are abandoned
    /// and no further events are delivered. Idempotent.
    fn close(&self);
}

/// Creates transports.
pub trait TransportConnector: Send + Sync {
    /// Build a transport for `address`. Construction is synchronous; the
    /// connection itself proceeds in the background and reports through `sink`.
    fn open(
        &self,
        address: &str,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> PdResult<Arc<dyn Transport>>;
}

/// Settings applied to every transport the client creates.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Transport preference order.
    pub transports: Vec<TransportKind>,
    /// Timeout for one connection attempt.
    pub timeout: Duration,
    /// Whether the transport retries on its own.
    pub reconnection: bool,
    /// Consecutive failed attempts before giving up.
    pub reconnection_attempts: u32,
    /// Fixed delay between attempts.
    pub reconnection_delay: Duration,
    /// Handshake path, e.g. `/socket.io/`.
    pub path: String,
    /// Extra query parameters for the handshake.
    pub query: Vec<(String, String)>,
    /// Extra HTTP headers for the handshake.
    pub headers: HashMap<String, String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for TransportOptions {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            transports: config.transports.clone(),
            timeout: config.connect_timeout(),
            reconnection: config.reconnection,
            reconnection_attempts: config.reconnection_attempts.max(1),
            reconnection_delay: config.reconnection_delay(),
            path: config.path.clone(),
            query: Vec::new(),
            headers: HashMap::new(),
        }
    }
}

impl TransportOptions {
    /// Attach handshake headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Add a handshake query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}
