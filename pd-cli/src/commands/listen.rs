//! Listen command - stream connection events and notifications.

use std::future::Future;
use std::path::Path;

use chrono::Local;
use console::style;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::error;

use pd_core::config::ConfigHandle;
use pd_core::constants::events;
use pd_core::error::{PdError, PdResult};
use pd_core::service::Service;
use pd_socket::{ClientEventType, RealtimeEvent, RealtimeSession};

use super::{config::apply_address, config::apply_store, print_ok, truncate};
use crate::OutputFormat;

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    address: Option<String>,
    store: Option<String>,
    save: bool,
    format: OutputFormat,
) -> PdResult<()> {
    if let Some(address) = address {
        apply_address(&config, &address).await?;
    }
    if let Some(store) = store {
        apply_store(&config, &store).await?;
    }

    let snapshot = config.read().await.clone();
    if !snapshot.is_server_configured() {
        error!("no server address configured. Use --address or `config set-address`.");
        return Err(PdError::MissingConfig("server address".into()));
    }
    if save {
        config.save_to(config_path).await?;
        print_ok(&format!("Config saved to {}", config_path.display()));
    }

    let mut session = RealtimeSession::from_config(&snapshot)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<RealtimeEvent>();
    let mut subscriptions = Vec::new();
    for name in events::LOCAL.iter().copied().chain([events::NEW_NOTIFICATION]) {
        let tx = tx.clone();
        let id = session.client().on(name, move |payload: &Value| {
            let _ = tx.send(RealtimeEvent::new(name, payload.clone()));
        });
        subscriptions.push((name, id));
    }
    drop(tx);

    if format == OutputFormat::Text {
        println!(
            "{} Connecting to {} (store: {})...",
            style("[..]").bold().dim(),
            snapshot.server.address,
            snapshot.server.store_id.as_deref().unwrap_or("none")
        );
    }
    session.init()?;
    if format == OutputFormat::Text {
        println!("  Listening for events... (Ctrl+C to stop)");
        println!();
    }

    let outcome = pump_events(&mut rx, tokio::signal::ctrl_c(), format).await;
    if outcome.is_ok() && format == OutputFormat::Text {
        println!("\n  Disconnecting...");
    }

    for (name, id) in subscriptions {
        session.client().off(name, id);
    }
    session.shutdown()?;
    outcome
}

/// Print events until `stop` resolves or the client gives up reconnecting.
async fn pump_events<F>(
    rx: &mut mpsc::UnboundedReceiver<RealtimeEvent>,
    stop: F,
    format: OutputFormat,
) -> PdResult<()>
where
    F: Future,
{
    tokio::pin!(stop);
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return Ok(()) };
                print_event(&event, format);
                if event.event_type == ClientEventType::ReconnectFailed {
                    return Err(PdError::Transport("gave up reconnecting".into()));
                }
            }
            _ = &mut stop => return Ok(()),
        }
    }
}

fn print_event(event: &RealtimeEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let line = json!({
                "at": Local::now().to_rfc3339(),
                "event": event.event_type.as_str(),
                "data": event.data,
            });
            println!("{line}");
        }
        OutputFormat::Text => println!("{}", describe(event)),
    }
}

/// One human-readable line for an event.
fn describe(event: &RealtimeEvent) -> String {
    let time = style(Local::now().format("%H:%M:%S").to_string()).dim();
    let tag = format!("[{}]", event.event_type.as_str());
    let tag = if event.event_type.is_error() {
        style(tag).red()
    } else if event.event_type.is_local() {
        style(tag).yellow()
    } else {
        style(tag).cyan()
    };

    let detail = if let Some(status) = event.as_connection_status() {
        match (status.connected, status.socket_id, status.reason) {
            (true, Some(id), _) => format!("connected (socket {id})"),
            (true, None, _) => "connected".to_string(),
            (false, _, Some(reason)) => format!("disconnected: {reason}"),
            (false, _, None) => "disconnected".to_string(),
        }
    } else if let Some(error) = event.as_connection_error() {
        format!("attempt {}: {}", error.attempts, error.error)
    } else if let Some(notification) = event.as_notification() {
        let title = notification.title.as_deref().unwrap_or("(untitled)");
        let kind = notification.kind.as_deref().unwrap_or("notification");
        match notification.message.as_deref() {
            Some(message) => format!("{kind}: {title} - {}", truncate(message, 80)),
            None => format!("{kind}: {title}"),
        }
    } else {
        event.data.to_string()
    };

    format!("  {time} {tag} {detail}")
}
