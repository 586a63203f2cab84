//! Connection status and status listeners

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::error;

// ----------------------------------------------------------------------------
// Connection Status
// ----------------------------------------------------------------------------

/// Lifecycle state of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Protocol failure or reconnect retries exhausted; needs a new `connect`
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

/// Snapshot published on every state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive reconnect attempts since the last successful handshake
    pub retry_count: u32,
    pub max_retries: u32,
    /// Detail of the most recent failure
    pub last_error: Option<String>,
    /// Automatic reconnection gave up
    pub reconnect_exhausted: bool,
}

impl ConnectionStatus {
    pub fn disconnected(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            max_retries,
            last_error: None,
            reconnect_exhausted: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

// ----------------------------------------------------------------------------
// Status Listeners
// ----------------------------------------------------------------------------

type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Ordered list of status callbacks
#[derive(Default)]
pub(crate) struct StatusListeners {
    listeners: Vec<(u64, StatusCallback)>,
    next_id: u64,
}

pub(crate) type SharedListeners = Arc<Mutex<StatusListeners>>;

pub(crate) fn lock_listeners(listeners: &SharedListeners) -> MutexGuard<'_, StatusListeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatusListeners {
    pub(crate) fn add(&mut self, callback: StatusCallback) -> u64 {
        self.next_id += 1;
        self.listeners.push((self.next_id, callback));
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    fn snapshot(&self) -> Vec<StatusCallback> {
        self.listeners.iter().map(|(_, cb)| cb.clone()).collect()
    }
}

/// Invoke every listener outside the lock so callbacks may (un)register
pub(crate) fn notify(listeners: &SharedListeners, status: &ConnectionStatus) {
    let callbacks = lock_listeners(listeners).snapshot();
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
            error!("Connection status listener panicked");
        }
    }
}

/// Disposer returned by `on_connection_status`
#[must_use = "dropping the handle keeps the listener registered; call remove() to detach it"]
pub struct ListenerHandle {
    id: u64,
    listeners: SharedListeners,
}

impl ListenerHandle {
    pub(crate) fn new(id: u64, listeners: SharedListeners) -> Self {
        Self { id, listeners }
    }

    /// Stop receiving status updates
    pub fn remove(self) -> bool {
        lock_listeners(&self.listeners).remove(self.id)
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
