//! Realtime session tied to the application root.
//!
//! `init` wires the client to the configured server and store room;
//! `shutdown` leaves the room and disconnects. In between the session keeps
//! a small [`ConnectivityIndicator`] for status displays.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use pd_core::config::AppConfig;
use pd_core::constants::events;
use pd_core::error::{PdError, PdResult};
use pd_core::service::{Service, ServiceState};

use crate::client::RealtimeClient;
use crate::events::{ConnectionErrorPayload, ConnectionStatusPayload, ReconnectFailedPayload};
use crate::registry::ListenerId;

/// Online badge plus the last connection error, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityIndicator {
    pub connected: bool,
    pub last_error: Option<String>,
}

pub struct RealtimeSession {
    client: Arc<RealtimeClient>,
    address: String,
    store_id: Option<String>,
    listeners: Vec<(&'static str, ListenerId)>,
    indicator: Arc<Mutex<ConnectivityIndicator>>,
    state: ServiceState,
}

impl RealtimeSession {
    pub fn new(
        client: Arc<RealtimeClient>,
        address: impl Into<String>,
        store_id: Option<String>,
    ) -> Self {
        Self {
            client,
            address: address.into(),
            store_id,
            listeners: Vec::new(),
            indicator: Arc::new(Mutex::new(ConnectivityIndicator::default())),
            state: ServiceState::Created,
        }
    }

    /// Session for the configured server and store.
    pub fn from_config(config: &AppConfig) -> PdResult<Self> {
        if !config.is_server_configured() {
            return Err(PdError::MissingConfig("server.address".into()));
        }
        let client = Arc::new(RealtimeClient::from_config(config));
        Ok(Self::new(
            client,
            config.server.address.clone(),
            config.server.store_id.clone(),
        ))
    }

    pub fn client(&self) -> &Arc<RealtimeClient> {
        &self.client
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn store_id(&self) -> Option<&str> {
        self.store_id.as_deref()
    }

    pub fn indicator(&self) -> ConnectivityIndicator {
        self.indicator.lock().clone()
    }

    fn register_listeners(&mut self) {
        let weak_client: Weak<RealtimeClient> = Arc::downgrade(&self.client);
        let store_id = self.store_id.clone();
        let indicator = Arc::clone(&self.indicator);
        let status = self.client.on(events::CONNECTION_STATUS, move |payload: &Value| {
            let connected = parse::<ConnectionStatusPayload>(payload).map_or(false, |s| s.connected);
            {
                let mut indicator = indicator.lock();
                indicator.connected = connected;
                if connected {
                    indicator.last_error = None;
                }
            }
            if !connected {
                return;
            }
            let (Some(client), Some(store_id)) = (weak_client.upgrade(), store_id.as_deref()) else {
                return;
            };
            if client.current_store().as_deref() != Some(store_id) {
                client.join_store(store_id);
            }
        });

        let indicator = Arc::clone(&self.indicator);
        let error = self.client.on(events::CONNECTION_ERROR, move |payload: &Value| {
            let mut indicator = indicator.lock();
            indicator.connected = false;
            indicator.last_error = Some(match parse::<ConnectionErrorPayload>(payload) {
                Some(error) => error.error,
                None => payload.to_string(),
            });
        });

        let indicator = Arc::clone(&self.indicator);
        let failed = self.client.on(events::RECONNECT_FAILED, move |payload: &Value| {
            let max_attempts = parse::<ReconnectFailedPayload>(payload).map_or(0, |p| p.max_attempts);
            let mut indicator = indicator.lock();
            indicator.connected = false;
            indicator.last_error = Some(format!("gave up after {max_attempts} attempts"));
        });

        self.listeners = vec![
            (events::CONNECTION_STATUS, status),
            (events::CONNECTION_ERROR, error),
            (events::RECONNECT_FAILED, failed),
        ];
    }

    fn remove_listeners(&mut self) {
        for (event, id) in self.listeners.drain(..) {
            self.client.off(event, id);
        }
    }
}

impl Service for RealtimeSession {
    fn name(&self) -> &str {
        "realtime"
    }

    fn state(&self) -> ServiceState {
        self.state
    }

    fn init(&mut self) -> PdResult<()> {
        if !self.state.can_start() {
            return Ok(());
        }
        self.register_listeners();

        if self.client.connect(&self.address).is_none() {
            self.remove_listeners();
            self.state = ServiceState::Failed;
            return Err(PdError::Transport(format!(
                "could not create a transport for {}",
                self.address
            )));
        }

        info!(
            "realtime session started for {} (store: {})",
            self.address,
            self.store_id.as_deref().unwrap_or("none")
        );
        self.state = ServiceState::Running;
        Ok(())
    }

    fn shutdown(&mut self) -> PdResult<()> {
        if self.state != ServiceState::Running {
            return Ok(());
        }
        if let Some(room) = self.client.current_store() {
            if !self.client.leave_store(&room) {
                warn!("could not notify the server about leaving store room {room}");
            }
        }
        self.remove_listeners();
        self.client.disconnect();
        self.indicator.lock().connected = false;
        self.state = ServiceState::Stopped;
        info!("realtime session stopped");
        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}
