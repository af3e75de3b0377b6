//! Wrapper that turns a raw socket into a plain `(event, callback)` interface.

use std::sync::Arc;

use serde_json::Value;

use super::transport::{ConnectionState, EventArg, EventSocket, Listener, ListenerId};

/// One shared physical connection, as seen by the dispatcher.
pub struct SocketConnection {
    base_url: String,
    socket: Arc<dyn EventSocket>,
}

impl SocketConnection {
    pub fn new(base_url: impl Into<String>, socket: Arc<dyn EventSocket>) -> Self {
        Self {
            base_url: base_url.into(),
            socket,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn state(&self) -> ConnectionState {
        self.socket.state()
    }

    /// Register `callback` for `event`. It receives data arguments only; a
    /// trailing ack handle appended by the transport is stripped first.
    pub fn on(
        &self,
        event: &str,
        callback: impl Fn(Vec<Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener: Listener = Arc::new(move |args| callback(strip_ack(args)));
        self.socket.on(event, listener)
    }

    pub fn off(&self, event: &str, id: ListenerId) {
        self.socket.off(event, id);
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) {
        self.socket.emit(event, args);
    }
}

/// Drop a trailing [`EventArg::Ack`] and unwrap the data arguments.
///
/// Only the last position can hold an ack handle; anything else in that spot
/// is data and passes through.
pub fn strip_ack(mut args: Vec<EventArg>) -> Vec<Value> {
    if matches!(args.last(), Some(EventArg::Ack(_))) {
        args.pop();
    }
    args.into_iter()
        .filter_map(|arg| match arg {
            EventArg::Data(value) => Some(value),
            EventArg::Ack(ack) => {
                crate::log_debug!("ignoring ack handle {} before the last argument", ack.id());
                None
            }
        })
        .collect()
}
