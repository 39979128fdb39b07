//! PharmaDesk Socket - realtime notification client.
//!
//! This crate provides the connection to the store notification server:
//! - `RealtimeClient`: connection state machine, listener routing, store rooms
//! - Engine.IO / Socket.IO transport over websocket with long-polling fallback
//! - Fixed-delay reconnection with a hard cap on failed attempts
//! - `RealtimeSession`: init/shutdown lifecycle for the application root

pub mod client;
pub mod events;
pub mod registry;
pub mod session;
pub mod transport;

// Re-export key types
pub use client::RealtimeClient;
pub use events::{
    ClientEventType, ConnectionErrorPayload, ConnectionState, ConnectionStatus,
    ConnectionStatusPayload, NotificationPayload, RealtimeEvent, ReconnectErrorPayload,
    ReconnectFailedPayload, ReconnectedPayload,
};
pub use registry::{Listener, ListenerId, ListenerRegistry};
pub use session::{ConnectivityIndicator, RealtimeSession};
pub use transport::{
    EngineConnector, Transport, TransportConnector, TransportEvent, TransportEventHandler,
    TransportOptions, TransportSink,
};
