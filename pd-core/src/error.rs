//! Global error types for PharmaDesk.
//!
//! All error categories are unified into a single `PdError` enum with
//! conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using PdError.
pub type PdResult<T> = Result<T, PdError>;

/// Unified error type covering all error categories in PharmaDesk.
#[derive(Error, Debug)]
pub enum PdError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Transport errors --
    /// The server address could not be turned into a transport endpoint.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// Realtime transport could not be created or is gone.
    #[error("transport error: {0}")]
    Transport(String),

    /// Engine.IO or Socket.IO handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A packet did not follow the Engine.IO / Socket.IO wire format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// HTTP request failed (long-polling transport).
    #[error("http error: {0}")]
    Http(String),

    /// WebSocket connection failed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Service errors --
    /// A service was used outside its running phase.
    #[error("service error: {0}")]
    Service(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for PdError {
    fn from(e: serde_json::Error) -> Self {
        PdError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PdError {
    fn from(e: toml::de::Error) -> Self {
        PdError::Config(e.to_string())
    }
}
