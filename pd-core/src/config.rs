//! Application configuration management.
//!
//! Handles loading, saving, and accessing the configuration: notification
//! server address, the store room to subscribe to, realtime transport tuning,
//! and logging. Configuration is persisted as TOML on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{PdError, PdResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Notification server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Realtime client tuning.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Notification server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server URL (e.g., "http://192.168.1.20:5000").
    #[serde(default)]
    pub address: String,

    /// Store room to join once connected.
    #[serde(default)]
    pub store_id: Option<String>,

    /// Extra HTTP headers sent with the transport handshake.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

/// Underlying transport flavours, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Engine.IO over a WebSocket.
    Websocket,
    /// Engine.IO HTTP long-polling.
    Polling,
}

impl TransportKind {
    /// Engine.IO `transport` query value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Websocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Realtime client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Transport preference order. Low-latency first, polling fallback second.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    /// Timeout for a single connection attempt in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Whether the transport retries on its own after a failure.
    #[serde(default = "default_true")]
    pub reconnection: bool,

    /// Consecutive failed attempts before the client gives up.
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    /// Fixed delay between reconnection attempts in milliseconds.
    #[serde(default = "default_reconnection_delay")]
    pub reconnection_delay_ms: u64,

    /// Socket.IO handshake path.
    #[serde(default = "default_socket_path")]
    pub path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::Websocket, TransportKind::Polling]
}

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_reconnection_attempts() -> u32 {
    constants::DEFAULT_RECONNECTION_ATTEMPTS
}

fn default_reconnection_delay() -> u64 {
    constants::DEFAULT_RECONNECTION_DELAY_MS
}

fn default_socket_path() -> String {
    constants::DEFAULT_SOCKET_PATH.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            transports: default_transports(),
            connect_timeout_ms: default_connect_timeout(),
            reconnection: true,
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay(),
            path: default_socket_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl RealtimeConfig {
    /// Connection attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between reconnection attempts.
    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    /// Reject settings the transport cannot work with.
    pub fn validate(&self) -> PdResult<()> {
        if self.transports.is_empty() {
            return Err(PdError::Config("realtime.transports must not be empty".into()));
        }
        if self.reconnection_attempts == 0 {
            return Err(PdError::Config(
                "realtime.reconnection_attempts must be at least 1".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PdError::Config("realtime.connect_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> PdResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> PdResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.realtime.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> PdResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> PdResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PdError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PdResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> PdResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Platform::log_dir()
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the server connection is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty()
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips trailing slashes.
    /// Bare hosts default to http; `ws://`/`wss://` are kept as given.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let has_scheme = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| trimmed.starts_with(scheme));
        let with_scheme = if has_scheme {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to the given path.
    pub async fn save_to(&self, path: &Path) -> PdResult<()> {
        let config = self.inner.read().await;
        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.realtime.connect_timeout_ms, 20_000);
        assert_eq!(config.realtime.reconnection_attempts, 5);
        assert_eq!(config.realtime.reconnection_delay(), Duration::from_secs(1));
        assert!(config.realtime.reconnection);
        assert_eq!(
            config.realtime.transports,
            vec![TransportKind::Websocket, TransportKind::Polling]
        );
        assert_eq!(config.logging.level, "info");
        assert!(!config.is_server_configured());
        assert!(config.server.store_id.is_none());
    }

    #[test]
    fn test_sanitize_server_address() {
        assert_eq!(
            AppConfig::sanitize_server_address("http://192.168.1.100:5000/"),
            "http://192.168.1.100:5000"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("  \"https://example.com/\"  "),
            "https://example.com"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("localhost:5000"),
            "http://localhost:5000"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("wss://rt.example.com"),
            "wss://rt.example.com"
        );
        assert_eq!(AppConfig::sanitize_server_address("   "), "");
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = AppConfig::default();
        config.server.address = "http://localhost:5000".into();
        config.server.store_id = Some("store-42".into());
        config.realtime.transports = vec![TransportKind::Polling];

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.server.store_id.as_deref(), Some("store-42"));
        assert_eq!(deserialized.realtime.transports, vec![TransportKind::Polling]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            address = "http://pharmacy.local:5000"

            [realtime]
            reconnection_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.realtime.reconnection_attempts, 3);
        assert_eq!(config.realtime.connect_timeout_ms, 20_000);
        assert_eq!(config.realtime.path, "/socket.io/");
        assert!(config.is_server_configured());
    }

    #[test]
    fn test_validate_rejects_empty_transports() {
        let mut realtime = RealtimeConfig::default();
        assert!(realtime.validate().is_ok());

        realtime.transports.clear();
        assert!(matches!(realtime.validate(), Err(PdError::Config(_))));

        let realtime = RealtimeConfig {
            reconnection_attempts: 0,
            ..RealtimeConfig::default()
        };
        assert!(realtime.validate().is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.server.address = "http://10.0.0.5:5000".into();
        config.server.store_id = Some("main-street".into());
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.address, "http://10.0.0.5:5000");
        assert_eq!(loaded.server.store_id.as_deref(), Some("main-street"));
    }

    #[tokio::test]
    async fn test_config_handle_write_then_read() {
        let handle = ConfigHandle::new(AppConfig::default());
        handle.write().await.server.store_id = Some("s1".into());
        assert_eq!(handle.read().await.server.store_id.as_deref(), Some("s1"));
    }
}
