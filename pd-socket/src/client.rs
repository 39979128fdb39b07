//! Realtime notification client.
//!
//! Owns at most one transport at a time, drives the connection state machine
//! from transport events and routes every event through a persistent
//! listener registry. Transport failures never surface as errors; they are
//! reported to listeners as `connection-error`, `reconnect-error` and
//! `reconnect-failed`.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use pd_core::config::AppConfig;
use pd_core::constants::{events, CLIENT_DISCONNECT_REASON};
use pd_core::platform::Platform;

use crate::events::{
    ConnectionErrorPayload, ConnectionState, ConnectionStatus, ConnectionStatusPayload,
    ReconnectErrorPayload, ReconnectFailedPayload, ReconnectedPayload,
};
use crate::registry::{ListenerId, ListenerRegistry};
use crate::transport::{
    EngineConnector, Transport, TransportConnector, TransportEvent, TransportEventHandler,
    TransportOptions, TransportSink,
};

/// Mutable client state, guarded by one lock.
struct ClientState {
    connection: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    /// Bumped whenever the current transport is replaced or abandoned.
    generation: u64,
    socket_id: Option<String>,
    reconnect_attempts: u32,
    /// Last store room successfully joined.
    store_room: Option<String>,
}

struct ClientInner {
    options: TransportOptions,
    connector: Arc<dyn TransportConnector>,
    registry: ListenerRegistry,
    state: Mutex<ClientState>,
    /// Held from a state change until its notices are delivered, so lifecycle
    /// notices reach listeners in the order the changes happened. Taken
    /// before `state`; re-entrant for listeners that call back in.
    dispatch: ReentrantMutex<()>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Client for the store notification server.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    pub fn new(options: TransportOptions, connector: Arc<dyn TransportConnector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ClientInner {
                options,
                connector,
                registry: ListenerRegistry::new(),
                state: Mutex::new(ClientState {
                    connection: ConnectionState::Disconnected,
                    transport: None,
                    generation: 0,
                    socket_id: None,
                    reconnect_attempts: 0,
                    store_room: None,
                }),
                dispatch: ReentrantMutex::new(()),
                state_tx,
            }),
        }
    }

    /// Client using the Engine.IO transport, tuned from `[realtime]` and
    /// sending the configured custom headers.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut headers = config.server.custom_headers.clone();
        if !headers.keys().any(|key| key.eq_ignore_ascii_case("user-agent")) {
            headers.insert("User-Agent".to_string(), Platform::user_agent());
        }
        let options = TransportOptions::from(&config.realtime).with_headers(headers);
        Self::new(options, Arc::new(EngineConnector::new()))
    }

    /// Start connecting to `address`, replacing any existing transport.
    ///
    /// Returns the new transport handle, or `None` if it could not be
    /// constructed. The outcome of the connection itself is reported through
    /// listeners.
    pub fn connect(&self, address: &str) -> Option<Arc<dyn Transport>> {
        let (previous, generation) = {
            let mut state = self.inner.state.lock();
            let previous = state.transport.take();
            state.generation += 1;
            state.socket_id = None;
            state.reconnect_attempts = 0;
            // A fresh transport has no room membership on the server.
            state.store_room = None;
            self.inner.set_connection(&mut state, ConnectionState::Connecting);
            (previous, state.generation)
        };
        if let Some(previous) = previous {
            debug!("closing previous transport before reconnecting");
            previous.close();
        }

        info!("realtime connecting to {address}");
        let inner: Arc<dyn TransportEventHandler> = self.inner.clone();
        let handler: Weak<dyn TransportEventHandler> = Arc::downgrade(&inner);
        let sink = TransportSink::new(handler, generation);

        match self.inner.connector.open(address, &self.inner.options, sink) {
            Ok(transport) => {
                let mut state = self.inner.state.lock();
                if state.generation != generation {
                    drop(state);
                    debug!("transport #{generation} superseded before it was stored");
                    transport.close();
                    return None;
                }
                state.transport = Some(Arc::clone(&transport));
                Some(transport)
            }
            Err(e) => {
                error!("failed to create realtime transport for {address}: {e}");
                let mut state = self.inner.state.lock();
                if state.generation == generation {
                    self.inner.set_connection(&mut state, ConnectionState::Disconnected);
                }
                None
            }
        }
    }

    /// Tear down the transport, stopping any pending reconnection.
    /// Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let _dispatching = self.inner.dispatch.lock();
        let (transport, was_connected) = {
            let mut state = self.inner.state.lock();
            let was_connected = state.connection.is_connected();
            state.generation += 1;
            state.socket_id = None;
            self.inner.set_connection(&mut state, ConnectionState::Disconnected);
            (state.transport.take(), was_connected)
        };

        if let Some(transport) = transport {
            transport.close();
            info!("realtime disconnected");
        }
        if was_connected {
            self.inner.registry.dispatch(
                events::CONNECTION_STATUS,
                &to_payload(&ConnectionStatusPayload {
                    connected: false,
                    socket_id: None,
                    reason: Some(CLIENT_DISCONNECT_REASON.to_string()),
                }),
            );
        }
    }

    /// Register a listener for `event`. Listeners persist across transports.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.on(event, Arc::new(callback))
    }

    /// Remove a listener registered with [`RealtimeClient::on`].
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.registry.off(event, id)
    }

    /// Send an event to the server. Returns false, without queueing, if not
    /// connected.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        self.inner.emit(event, payload)
    }

    /// Join a store room. The room is remembered, and re-joined after a
    /// reconnect, only if the join was actually sent.
    pub fn join_store(&self, store_id: &str) -> bool {
        let sent = self.emit(events::JOIN_STORE, Value::String(store_id.to_string()));
        if sent {
            self.inner.state.lock().store_room = Some(store_id.to_string());
            info!("joined store room {store_id}");
        }
        sent
    }

    /// Leave a store room. Stops tracking it even if the leave could not be
    /// sent.
    pub fn leave_store(&self, store_id: &str) -> bool {
        let sent = self.emit(events::LEAVE_STORE, Value::String(store_id.to_string()));
        let mut state = self.inner.state.lock();
        if state.store_room.as_deref() == Some(store_id) {
            state.store_room = None;
        }
        sent
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let state = self.inner.state.lock();
        ConnectionStatus {
            connected: state.connection.is_connected(),
            socket_id: state.socket_id.clone(),
            reconnect_attempts: state.reconnect_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Store room currently tracked for re-join.
    pub fn current_store(&self) -> Option<String> {
        self.inner.state.lock().store_room.clone()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.registry.listener_count(event)
    }

    pub fn options(&self) -> &TransportOptions {
        &self.inner.options
    }
}

impl ClientInner {
    fn set_connection(&self, state: &mut ClientState, next: ConnectionState) {
        if state.connection != next {
            info!("realtime state: {} -> {}", state.connection, next);
            state.connection = next;
            self.state_tx.send_replace(next);
        }
    }

    fn emit(&self, event: &str, payload: Value) -> bool {
        let transport = {
            let state = self.state.lock();
            match (&state.transport, state.connection) {
                (Some(transport), ConnectionState::Connected) => Some(Arc::clone(transport)),
                _ => None,
            }
        };
        let Some(transport) = transport else {
            warn!("dropping {event}: realtime client is not connected");
            return false;
        };

        match transport.send(event, payload) {
            Ok(()) => {
                debug!("emitted {event}");
                true
            }
            Err(e) => {
                warn!("failed to emit {event}: {e}");
                false
            }
        }
    }

    /// Stop using the current transport: it will not be used for sends and
    /// its later events are ignored.
    fn abandon_transport(state: &mut ClientState) -> Option<Arc<dyn Transport>> {
        state.generation += 1;
        state.socket_id = None;
        state.transport.take()
    }
}

impl TransportEventHandler for ClientInner {
    fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        let mut notices: Vec<(String, Value)> = Vec::new();
        let mut rejoin = None;
        let mut abandoned = None;
        let _dispatching = self.dispatch.lock();

        {
            let mut state = self.state.lock();
            if generation != state.generation {
                debug!(
                    "ignoring {} from stale transport #{generation} (current #{})",
                    event.label(),
                    state.generation
                );
                return;
            }
            if state.connection == ConnectionState::Failed {
                debug!("ignoring {} after giving up", event.label());
                return;
            }

            match event {
                TransportEvent::Connect { socket_id } => {
                    info!("realtime connected (socket {socket_id})");
                    state.socket_id = Some(socket_id.clone());
                    state.reconnect_attempts = 0;
                    self.set_connection(&mut state, ConnectionState::Connected);
                    notices.push(notice(
                        events::CONNECTION_STATUS,
                        &ConnectionStatusPayload {
                            connected: true,
                            socket_id: Some(socket_id),
                            reason: None,
                        },
                    ));
                }
                TransportEvent::Reconnect { attempt } => {
                    info!("realtime reconnected after {attempt} attempt(s)");
                    state.reconnect_attempts = 0;
                    self.set_connection(&mut state, ConnectionState::Connected);
                    notices.push(notice(
                        events::RECONNECTED,
                        &ReconnectedPayload { attempts: attempt },
                    ));
                    rejoin = state.store_room.clone();
                }
                TransportEvent::Disconnect { reason } => {
                    if state.connection.is_connected() {
                        warn!("realtime disconnected: {reason}");
                        state.socket_id = None;
                        self.set_connection(&mut state, ConnectionState::Disconnected);
                        notices.push(notice(
                            events::CONNECTION_STATUS,
                            &ConnectionStatusPayload {
                                connected: false,
                                socket_id: None,
                                reason: Some(reason),
                            },
                        ));
                    } else {
                        debug!("disconnect ({reason}) while {}", state.connection);
                    }
                }
                TransportEvent::ConnectError { error } => {
                    state.reconnect_attempts += 1;
                    let attempts = state.reconnect_attempts;
                    warn!("realtime connection error (attempt {attempts}): {error}");
                    notices.push(notice(
                        events::CONNECTION_ERROR,
                        &ConnectionErrorPayload { error, attempts },
                    ));

                    let max_attempts = self.options.reconnection_attempts;
                    if !self.options.reconnection {
                        self.set_connection(&mut state, ConnectionState::Disconnected);
                        abandoned = Self::abandon_transport(&mut state);
                    } else if attempts >= max_attempts {
                        error!("realtime gave up after {attempts} failed attempt(s)");
                        self.set_connection(&mut state, ConnectionState::Failed);
                        abandoned = Self::abandon_transport(&mut state);
                        notices.push(notice(
                            events::RECONNECT_FAILED,
                            &ReconnectFailedPayload { max_attempts },
                        ));
                    } else {
                        self.set_connection(&mut state, ConnectionState::Reconnecting);
                    }
                }
                TransportEvent::ReconnectError { error } => {
                    if state.connection == ConnectionState::Reconnecting {
                        notices.push(notice(
                            events::RECONNECT_ERROR,
                            &ReconnectErrorPayload {
                                error,
                                attempts: state.reconnect_attempts,
                            },
                        ));
                    } else {
                        debug!("reconnect error while {}: {error}", state.connection);
                    }
                }
                TransportEvent::ReconnectFailed => {
                    error!("realtime transport stopped retrying");
                    self.set_connection(&mut state, ConnectionState::Failed);
                    abandoned = Self::abandon_transport(&mut state);
                    notices.push(notice(
                        events::RECONNECT_FAILED,
                        &ReconnectFailedPayload {
                            max_attempts: self.options.reconnection_attempts,
                        },
                    ));
                }
                TransportEvent::Message { event, payload } => {
                    notices.push((event, payload));
                }
            }
        }

        if let Some(transport) = abandoned {
            transport.close();
        }
        for (name, payload) in &notices {
            self.registry.dispatch(name, payload);
        }
        if let Some(room) = rejoin {
            debug!("re-joining store room {room}");
            self.emit(events::JOIN_STORE, Value::String(room));
        }
    }
}

fn to_payload<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_default()
}

fn notice<T: Serialize>(name: &str, payload: &T) -> (String, Value) {
    (name.to_string(), to_payload(payload))
}
