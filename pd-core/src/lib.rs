//! PharmaDesk Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other PharmaDesk crates:
//! - Application configuration (server address, store room, realtime tuning)
//! - Unified error type
//! - Structured logging with tracing
//! - Platform directories
//! - The `Service` lifecycle trait

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;
pub mod service;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle, RealtimeConfig, TransportKind};
pub use error::{PdError, PdResult};
pub use logging::init_logging;
pub use platform::Platform;
pub use service::{Service, ServiceState};
