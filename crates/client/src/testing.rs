//! In-process transports for tests and embedders.
//!
//! - [`MemoryTransport`]: an event hub. Sockets it opens are recorded, and
//!   [`MemoryTransport::publish`] plays the backend's side of a channel.
//! - [`MockHttp`]: replays queued responses and records every request.
//!
//! ```ignore
//! let hub = MemoryTransport::new();
//! let client = ApiClient::new(config, session)
//!     .with_socket_registry(Arc::new(SocketRegistry::new(Arc::new(hub.clone()))));
//! let stream = client.subscribe(RequestDescriptor::post("/widgets").streaming(true));
//! hub.publish("http://localhost:3000", "[POST]/widgets", vec![json!({"id": 1}).into()]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bridgekit_shared::HttpFailure;
use serde_json::Value;

use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::ws::{
    ConnectOptions, ConnectionState, EventArg, EventSocket, EventTransport, Listener, ListenerId,
    ListenerTable,
};

/// Socket opened by a [`MemoryTransport`].
pub struct MemorySocket {
    url: String,
    options: ConnectOptions,
    listeners: ListenerTable,
    emitted: Mutex<Vec<(String, Vec<Value>)>>,
}

impl EventSocket for MemorySocket {
    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    fn off(&self, event: &str, id: ListenerId) {
        self.listeners.remove(event, id);
    }

    fn emit(&self, event: &str, args: Vec<Value>) {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), args));
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

/// Event hub standing in for a real socket backend. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sockets: Arc<Mutex<Vec<Arc<MemorySocket>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sockets(&self) -> Vec<Arc<MemorySocket>> {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn socket_for(&self, url: &str) -> Option<Arc<MemorySocket>> {
        self.sockets().into_iter().find(|s| s.url == url)
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.sockets().len()
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.sockets().iter().map(|s| s.url.clone()).collect()
    }

    pub fn options_for(&self, url: &str) -> Option<ConnectOptions> {
        self.socket_for(url).map(|s| s.options.clone())
    }

    pub fn listener_count(&self, url: &str, event: &str) -> usize {
        self.socket_for(url).map_or(0, |s| s.listeners.count(event))
    }

    /// Events emitted by the client on the socket for `url`.
    pub fn emitted(&self, url: &str) -> Vec<(String, Vec<Value>)> {
        self.socket_for(url)
            .map(|s| {
                s.emitted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Deliver `event` to every listener on the socket for `url`.
    /// Returns how many listeners ran.
    pub fn publish(&self, url: &str, event: &str, args: Vec<EventArg>) -> usize {
        match self.socket_for(url) {
            Some(socket) => socket.listeners.dispatch(event, args),
            None => 0,
        }
    }
}

impl EventTransport for MemoryTransport {
    fn connect(&self, url: &str, options: ConnectOptions) -> Arc<dyn EventSocket> {
        let socket = Arc::new(MemorySocket {
            url: url.to_string(),
            options,
            listeners: ListenerTable::default(),
            emitted: Mutex::new(Vec::new()),
        });
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(socket.clone());
        socket
    }
}

/// HTTP transport returning queued results in order. Clones share state.
#[derive(Clone, Default)]
pub struct MockHttp {
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, HttpFailure>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push(Ok(HttpResponse {
            status,
            body: body.into(),
        }))
    }

    pub fn fail(&self, reason: impl Into<String>) -> &Self {
        self.push(Err(HttpFailure::Transport(reason.into())))
    }

    fn push(&self, result: Result<HttpResponse, HttpFailure>) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(HttpFailure::Transport("no queued response".into())))
    }
}
