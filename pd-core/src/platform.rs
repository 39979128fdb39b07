//! Host platform and per-user directories.

use std::path::PathBuf;

use crate::constants::{APP_NAME, APP_VERSION};
use crate::error::{PdError, PdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    /// Per-user data directory, e.g. `~/.local/share/PharmaDesk` on Linux.
    pub fn data_dir() -> PdResult<PathBuf> {
        dirs::data_dir()
            .map(|base| base.join(APP_NAME))
            .ok_or_else(|| PdError::Config("could not determine data directory".into()))
    }

    /// Per-user config directory, e.g. `~/.config/PharmaDesk` on Linux.
    pub fn config_dir() -> PdResult<PathBuf> {
        dirs::config_dir()
            .map(|base| base.join(APP_NAME))
            .ok_or_else(|| PdError::Config("could not determine config directory".into()))
    }

    /// Default location for rotated log files.
    pub fn log_dir() -> PdResult<PathBuf> {
        Ok(Self::data_dir()?.join("logs"))
    }

    /// `User-Agent` sent with the realtime handshake.
    pub fn user_agent() -> String {
        format!("{APP_NAME}/{APP_VERSION} ({})", Self::current())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::MacOs => "macOS",
            Self::Linux => "Linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
