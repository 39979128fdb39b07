//! Realtime event types, payloads, and connection state.
//!
//! Local events are re-broadcast by the client to registered listeners and
//! never travel over the wire. Their payloads are serialized to JSON with the
//! camelCase keys UI code expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use pd_core::constants::events as names;

/// Event names the client knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientEventType {
    /// Connection went up or down (`connection-status`).
    ConnectionStatus,
    /// A connection attempt failed (`connection-error`).
    ConnectionError,
    /// The connection came back after failures (`reconnected`).
    Reconnected,
    /// A reconnection attempt failed (`reconnect-error`).
    ReconnectError,
    /// Reconnection gave up (`reconnect-failed`).
    ReconnectFailed,
    /// A store notification pushed by the server (`new-notification`).
    NewNotification,
    /// Any other server event.
    Other(String),
}

impl ClientEventType {
    /// Parse an event name.
    pub fn from_name(name: &str) -> Self {
        match name {
            names::CONNECTION_STATUS => Self::ConnectionStatus,
            names::CONNECTION_ERROR => Self::ConnectionError,
            names::RECONNECTED => Self::Reconnected,
            names::RECONNECT_ERROR => Self::ReconnectError,
            names::RECONNECT_FAILED => Self::ReconnectFailed,
            names::NEW_NOTIFICATION => Self::NewNotification,
            other => Self::Other(other.to_string()),
        }
    }

    /// Convert to the event name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionStatus => names::CONNECTION_STATUS,
            Self::ConnectionError => names::CONNECTION_ERROR,
            Self::Reconnected => names::RECONNECTED,
            Self::ReconnectError => names::RECONNECT_ERROR,
            Self::ReconnectFailed => names::RECONNECT_FAILED,
            Self::NewNotification => names::NEW_NOTIFICATION,
            Self::Other(s) => s.as_str(),
        }
    }

    /// Whether this event is produced locally by the client.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ConnectionStatus
                | Self::ConnectionError
                | Self::Reconnected
                | Self::ReconnectError
                | Self::ReconnectFailed
        )
    }

    /// Whether this event signals a connectivity problem.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError | Self::ReconnectError | Self::ReconnectFailed
        )
    }
}

/// Payload of `connection-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusPayload {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `connection-error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionErrorPayload {
    pub error: String,
    pub attempts: u32,
}

/// Payload of `reconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectedPayload {
    /// Attempt number that succeeded, as reported by the transport.
    pub attempts: u32,
}

/// Payload of `reconnect-error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectErrorPayload {
    pub error: String,
    pub attempts: u32,
}

/// Payload of `reconnect-failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectFailedPayload {
    pub max_attempts: u32,
}

/// A store notification as the backend sends it.
///
/// Only the commonly rendered fields are typed; everything else is kept in
/// `extra` so the object can be forwarded unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Notification category, e.g. "expiry" or "low-stock".
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An event with type and associated data payload.
#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    pub event_type: ClientEventType,
    pub data: Value,
}

impl RealtimeEvent {
    /// Build an event from a name and payload.
    pub fn new(name: &str, data: Value) -> Self {
        Self {
            event_type: ClientEventType::from_name(name),
            data,
        }
    }

    /// Try to parse the data as a ConnectionStatusPayload.
    pub fn as_connection_status(&self) -> Option<ConnectionStatusPayload> {
        if self.event_type == ClientEventType::ConnectionStatus {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to parse the data as a ConnectionErrorPayload.
    pub fn as_connection_error(&self) -> Option<ConnectionErrorPayload> {
        if self.event_type == ClientEventType::ConnectionError {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to parse the data as a NotificationPayload.
    pub fn as_notification(&self) -> Option<NotificationPayload> {
        if self.event_type == ClientEventType::NewNotification {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }
}

/// Connection state of the realtime client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Connected and receiving events.
    Connected,
    /// Attempts failed, transport is retrying.
    Reconnecting,
    /// Gave up. Needs an explicit `connect()`.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot returned by `RealtimeClient::connection_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub socket_id: Option<String>,
    pub reconnect_attempts: u32,
}
