//! Listener registry keyed by event name.
//!
//! The registry outlives any transport: subscriptions made before a
//! disconnect keep firing after the next connect. Dispatch works on a copy of
//! the listener list, so a listener may register or unregister (itself
//! included) while it runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

/// Callback invoked with the event payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying one registration, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered multi-map from event name to listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Duplicate callbacks are all kept and all fire.
    pub fn on(&self, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one registration. Returns false if it was not registered
    /// under `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Invoke every listener for `event` in registration order.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.lock().get(event) {
            Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => Vec::new(),
        };

        if snapshot.is_empty() {
            debug!("no listeners for {event}");
            return 0;
        }

        for listener in &snapshot {
            listener(payload);
        }
        debug!("dispatched {event} to {} listener(s)", snapshot.len());
        snapshot.len()
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Names with at least one listener.
    pub fn event_names(&self) -> Vec<String> {
        self.listeners.lock().keys().cloned().collect()
    }
}
