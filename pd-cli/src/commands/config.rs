//! Configuration commands.

use std::path::Path;

use clap::Subcommand;
use console::style;

use pd_core::config::{AppConfig, ConfigHandle};
use pd_core::error::{PdError, PdResult};

use super::print_ok;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Set the notification server address.
    SetAddress {
        /// Server URL, e.g. http://192.168.1.20:3000.
        address: String,
    },
    /// Set the store room joined on connect.
    SetStore {
        /// Store identifier.
        store_id: String,
    },
}

/// Run a config subcommand.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> PdResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*cfg)?),
                OutputFormat::Text => print_config(&cfg, config_path),
            }
            Ok(())
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                return Err(PdError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                )));
            }
            AppConfig::default().save_to_file(config_path)?;
            print_ok(&format!("Wrote {}", config_path.display()));
            Ok(())
        }
        ConfigAction::SetAddress { address } => {
            let address = apply_address(&config, &address).await?;
            config.save_to(config_path).await?;
            print_ok(&format!("Server address set to {address}"));
            Ok(())
        }
        ConfigAction::SetStore { store_id } => {
            let store_id = apply_store(&config, &store_id).await?;
            config.save_to(config_path).await?;
            print_ok(&format!("Store room set to {store_id}"));
            Ok(())
        }
    }
}

/// Sanitize and store a server address. Returns the stored value.
pub async fn apply_address(config: &ConfigHandle, address: &str) -> PdResult<String> {
    let address = AppConfig::sanitize_server_address(address);
    if address.is_empty() {
        return Err(PdError::InvalidAddress("server address is empty".into()));
    }
    config.write().await.server.address = address.clone();
    Ok(address)
}

/// Store the store room id. Returns the stored value.
pub async fn apply_store(config: &ConfigHandle, store_id: &str) -> PdResult<String> {
    let store_id = store_id.trim();
    if store_id.is_empty() {
        return Err(PdError::Config("store id is empty".into()));
    }
    config.write().await.server.store_id = Some(store_id.to_string());
    Ok(store_id.to_string())
}

fn print_config(cfg: &AppConfig, path: &Path) {
    println!("{}", style("Configuration").bold().underlined());
    println!("  File:        {}", path.display());
    println!();
    println!("{}", style("[server]").cyan());
    let address = if cfg.server.address.is_empty() {
        style("(not set)".to_string()).yellow()
    } else {
        style(cfg.server.address.clone())
    };
    println!("  address:     {address}");
    println!(
        "  store_id:    {}",
        cfg.server.store_id.as_deref().unwrap_or("(none)")
    );
    println!("  headers:     {}", cfg.server.custom_headers.len());
    println!();
    println!("{}", style("[realtime]").cyan());
    let transports: Vec<&str> = cfg.realtime.transports.iter().map(|t| t.as_str()).collect();
    println!("  transports:  {}", transports.join(", "));
    println!("  timeout:     {}ms", cfg.realtime.connect_timeout_ms);
    println!("  reconnect:   {}", cfg.realtime.reconnection);
    println!("  attempts:    {}", cfg.realtime.reconnection_attempts);
    println!("  delay:       {}ms", cfg.realtime.reconnection_delay_ms);
    println!("  path:        {}", cfg.realtime.path);
    println!();
    println!("{}", style("[logging]").cyan());
    println!("  level:       {}", cfg.logging.level);
    println!("  json:        {}", cfg.logging.json_output);
}
