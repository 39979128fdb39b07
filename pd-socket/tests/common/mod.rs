//! Shared test utilities for integration tests.
//!
//! `StubConnector` hands out `StubTransport`s that record every send and
//! close, and keeps each transport's sink so a test can play the server side
//! by delivering transport events directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use pd_core::error::{PdError, PdResult};
use pd_socket::{
    RealtimeClient, Transport, TransportConnector, TransportEvent, TransportOptions,
    TransportSink,
};

/// Transport that records instead of talking to a server.
#[derive(Default)]
pub struct StubTransport {
    sent: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl StubTransport {
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    /// Payloads sent under `event`.
    pub fn sent_for(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

impl Transport for StubTransport {
    fn id(&self) -> Option<String> {
        None
    }

    fn send(&self, event: &str, payload: Value) -> PdResult<()> {
        if self.is_closed() || self.fail_sends.load(Ordering::SeqCst) {
            return Err(PdError::Transport("stub transport rejected send".into()));
        }
        self.sent.lock().push((event.to_string(), payload));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One `open` call seen by the stub connector.
#[derive(Clone)]
pub struct Opened {
    pub address: String,
    pub transport: Arc<StubTransport>,
    pub sink: TransportSink,
}

impl Opened {
    pub fn deliver(&self, event: TransportEvent) {
        self.sink.deliver(event);
    }
}

#[derive(Default)]
pub struct StubConnector {
    opened: Mutex<Vec<Opened>>,
    refuse: AtomicBool,
}

impl StubConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connector whose `open` always fails.
    pub fn refusing() -> Arc<Self> {
        let connector = Self::default();
        connector.refuse.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn opened(&self, index: usize) -> Opened {
        self.opened.lock()[index].clone()
    }

    pub fn latest(&self) -> Opened {
        self.opened
            .lock()
            .last()
            .cloned()
            .expect("no transport opened yet")
    }
}

impl TransportConnector for StubConnector {
    fn open(
        &self,
        address: &str,
        _options: &TransportOptions,
        sink: TransportSink,
    ) -> PdResult<Arc<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PdError::InvalidAddress(address.to_string()));
        }
        let transport = Arc::new(StubTransport::default());
        self.opened.lock().push(Opened {
            address: address.to_string(),
            transport: Arc::clone(&transport),
            sink,
        });
        Ok(transport)
    }
}

/// Options with a small attempt cap and no real delays.
pub fn test_options(max_attempts: u32) -> TransportOptions {
    TransportOptions {
        reconnection_attempts: max_attempts,
        reconnection_delay: Duration::from_millis(10),
        timeout: Duration::from_millis(500),
        ..TransportOptions::default()
    }
}

/// Client wired to `connector`.
pub fn create_test_client(connector: &Arc<StubConnector>, max_attempts: u32) -> RealtimeClient {
    let connector: Arc<dyn TransportConnector> = Arc::clone(connector) as Arc<dyn TransportConnector>;
    RealtimeClient::new(test_options(max_attempts), connector)
}

/// Record every payload delivered for `event`.
pub fn record(client: &RealtimeClient, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    client.on(event, move |payload: &Value| log.lock().push(payload.clone()));
    seen
}

pub fn connect_event(socket_id: &str) -> TransportEvent {
    TransportEvent::Connect {
        socket_id: socket_id.to_string(),
    }
}

pub fn connect_error(error: &str) -> TransportEvent {
    TransportEvent::ConnectError {
        error: error.to_string(),
    }
}
