//! Lifecycle for components mounted at the application root.
//!
//! A `Service` is brought up once with `init` and torn down once with
//! `shutdown`; both are synchronous so they can run from any context.

use crate::error::PdResult;

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, `init` not called yet.
    Created,
    Running,
    /// Torn down. A stopped service may be initialized again.
    Stopped,
    /// `init` failed.
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Whether `init` may be called in this state.
    pub fn can_start(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component with explicit startup and teardown.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ServiceState;

    /// Bring the service up. Called when the application root mounts.
    fn init(&mut self) -> PdResult<()>;

    /// Tear the service down. Called when the application root unmounts.
    fn shutdown(&mut self) -> PdResult<()>;

    /// True while the service is running.
    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}
