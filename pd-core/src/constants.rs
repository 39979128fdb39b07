//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "PharmaDesk";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Socket.IO handshake path on the notification server.
pub const DEFAULT_SOCKET_PATH: &str = "/socket.io/";

/// Engine.IO protocol revision spoken by the transport.
pub const ENGINE_IO_PROTOCOL: u8 = 4;

/// Default connection attempt timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 5;

/// Default fixed delay between reconnection attempts in milliseconds.
pub const DEFAULT_RECONNECTION_DELAY_MS: u64 = 1_000;

/// Reason reported to `connection-status` listeners on a manual disconnect.
pub const CLIENT_DISCONNECT_REASON: &str = "io client disconnect";

/// Reason reported when the server closes the namespace.
pub const SERVER_DISCONNECT_REASON: &str = "io server disconnect";

/// Local and wire event names used by the realtime client.
pub mod events {
    /// Local: connection up/down.
    pub const CONNECTION_STATUS: &str = "connection-status";
    /// Local: a connection attempt failed.
    pub const CONNECTION_ERROR: &str = "connection-error";
    /// Local: connection re-established after failures.
    pub const RECONNECTED: &str = "reconnected";
    /// Local: a reconnection attempt failed.
    pub const RECONNECT_ERROR: &str = "reconnect-error";
    /// Local: reconnection gave up.
    pub const RECONNECT_FAILED: &str = "reconnect-failed";

    /// Inbound: a store notification pushed by the server.
    pub const NEW_NOTIFICATION: &str = "new-notification";

    /// Outbound: subscribe to a store room.
    pub const JOIN_STORE: &str = "join-store";
    /// Outbound: unsubscribe from a store room.
    pub const LEAVE_STORE: &str = "leave-store";

    /// All events the client re-broadcasts locally.
    pub const LOCAL: &[&str] = &[
        CONNECTION_STATUS,
        CONNECTION_ERROR,
        RECONNECTED,
        RECONNECT_ERROR,
        RECONNECT_FAILED,
    ];
}
