//! The event-messaging primitive the streaming path is built on.
//!
//! A transport opens sockets; a socket supports `on`, `off` and `emit`.
//! Listeners receive positional [`EventArg`]s. When the sender asked for an
//! acknowledgement, the transport appends an [`EventArg::Ack`] as the last
//! argument. That variant is the ack-handle contract: code that needs to
//! tell data from ack handles matches on it and never guesses.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

/// Callback invoked with the raw positional arguments of one delivery.
pub type Listener = Arc<dyn Fn(Vec<EventArg>) + Send + Sync>;

/// Identifies one registered listener so it can be detached later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Invocable acknowledgement handle appended by the transport.
#[derive(Clone)]
pub struct AckHandle {
    id: u64,
    reply: Arc<dyn Fn(u64, Vec<Value>) + Send + Sync>,
}

impl AckHandle {
    pub fn new(id: u64, reply: impl Fn(u64, Vec<Value>) + Send + Sync + 'static) -> Self {
        Self {
            id,
            reply: Arc::new(reply),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send the acknowledgement back to the peer.
    pub fn invoke(&self, args: Vec<Value>) {
        (self.reply)(self.id, args);
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone)]
pub enum EventArg {
    Data(Value),
    Ack(AckHandle),
}

impl EventArg {
    pub fn as_ack(&self) -> Option<&AckHandle> {
        match self {
            EventArg::Ack(ack) => Some(ack),
            EventArg::Data(_) => None,
        }
    }
}

impl From<Value> for EventArg {
    fn from(value: Value) -> Self {
        EventArg::Data(value)
    }
}

/// Connection state for a socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Options handed to [`EventTransport::connect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Extra handshake headers, e.g. the access token header.
    pub headers: Vec<(String, String)>,
}

impl ConnectOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One physical connection.
pub trait EventSocket: Send + Sync {
    fn on(&self, event: &str, listener: Listener) -> ListenerId;
    fn off(&self, event: &str, id: ListenerId);
    /// Queue an event for the peer. Sockets buffer until the connection is open.
    fn emit(&self, event: &str, args: Vec<Value>);
    fn state(&self) -> ConnectionState;
}

/// Opens sockets. `connect` returns immediately; establishment may continue
/// in the background.
pub trait EventTransport: Send + Sync {
    fn connect(&self, url: &str, options: ConnectOptions) -> Arc<dyn EventSocket>;
}

/// Per-event listener bookkeeping shared by socket implementations.
#[derive(Default)]
pub struct ListenerTable {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl ListenerTable {
    pub fn add(&self, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn remove(&self, event: &str, id: ListenerId) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = listeners.get_mut(event) {
            entries.retain(|(existing, _)| *existing != id);
            if entries.is_empty() {
                listeners.remove(event);
            }
        }
    }

    pub fn count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Call every listener for `event` in registration order. Returns how many ran.
    ///
    /// Listeners run outside the lock so they may register or detach listeners.
    pub fn dispatch(&self, event: &str, args: Vec<EventArg>) -> usize {
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &targets {
            listener(args.clone());
        }
        targets.len()
    }
}
