//! PharmaDesk CLI - terminal client for the store notification feed.
//!
//! Connects to the notification server, joins a store room and prints
//! connection events and notifications as they arrive. Also manages the
//! configuration file.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use pd_core::config::{AppConfig, ConfigHandle};
use pd_core::error::PdResult;
use pd_core::logging;
use pd_core::platform::Platform;

/// PharmaDesk - realtime store notifications.
#[derive(Parser)]
#[command(
    name = "pharmadesk",
    version,
    about = "PharmaDesk realtime notification client",
    long_about = "A command-line client for the PharmaDesk notification server.\n\
                   Joins a store room and streams notifications until interrupted."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// One JSON object per line.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print events until Ctrl+C.
    Listen {
        /// Server address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// Store room to join (overrides config).
        #[arg(short, long)]
        store: Option<String>,
        /// Save the overrides to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Show or edit the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> PdResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let level_override = cli.verbose.then_some("debug");
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = match logging::init_logging(&config.logging, &log_dir, level_override) {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_console_logging(level_override.unwrap_or(&config.logging.level));
            warn!("file logging unavailable: {e}");
            None
        }
    };

    info!(
        "PharmaDesk CLI v{} on {}",
        pd_core::constants::APP_VERSION,
        Platform::current()
    );

    let config_handle = ConfigHandle::new(config);

    match cli.command {
        Commands::Listen { address, store, save } => {
            commands::listen::run(config_handle, &config_path, address, store, save, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
