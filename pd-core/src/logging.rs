//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr so it never mixes with command output on
//! stdout. A second layer writes a daily-rotated file, plain or JSON.

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{PdError, PdResult};

/// Dependencies that are far too chatty at debug level.
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "hyper_util", "reqwest"];

/// Guard that keeps the non-blocking log writer alive.
/// Drop it to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Build the filter directive for `level`.
///
/// A bare level ("debug", "trace") also caps the transport libraries at
/// info; full directives such as "pd_socket=trace" are used as given.
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    let bare = matches!(level, "trace" | "debug");
    if !bare {
        return if level.is_empty() { "info".to_string() } else { level.to_string() };
    }
    let mut directive = level.to_string();
    for target in QUIET_TARGETS {
        directive.push_str(&format!(",{target}=info"));
    }
    directive
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directive(level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber: stderr console plus rotated file.
///
/// `level_override` (e.g. from `--verbose`) takes precedence over
/// `config.level`. Fails if the log directory cannot be created or a
/// subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
    log_dir: &Path,
    level_override: Option<&str>,
) -> PdResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let level = level_override.unwrap_or(&config.level);

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "pharmadesk.log"));

    let file_layer = if config.json_output {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true)
            .boxed()
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(env_filter(level))
        .try_init()
        .map_err(|e| PdError::Internal(format!("logging already initialized: {e}")))?;

    tracing::debug!("logging to {} at {level}", log_dir.display());
    Ok(LogGuard { _guard: guard })
}

/// Console-only logging, for tests and when the log directory is unusable.
/// Does nothing if a subscriber is already installed.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(env_filter(level))
        .try_init();
}
