//! WebSocket transport using tokio-tungstenite.
//!
//! Frames are JSON [`EventFrame`]s. Each socket runs one background task that
//! connects, then splits into a read task (dispatching to listeners) and a
//! write task (draining the outgoing queue). Emits made before the socket is
//! open wait in the queue. There is no reconnect.

use std::sync::{Arc, Mutex, PoisonError};

use bridgekit_shared::EventFrame;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

use super::transport::{
    AckHandle, ConnectOptions, ConnectionState, EventArg, EventSocket, EventTransport, Listener,
    ListenerId, ListenerTable,
};

/// Convert HTTP/HTTPS URL to WS/WSS
pub fn http_to_ws(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Opens [`WsSocket`]s on the current tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl EventTransport for WsTransport {
    fn connect(&self, url: &str, options: ConnectOptions) -> Arc<dyn EventSocket> {
        let (sender, receiver) = unbounded();
        let socket = Arc::new(WsSocket {
            url: url.to_string(),
            sender: sender.clone(),
            listeners: Arc::new(ListenerTable::default()),
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_connection(
                    http_to_ws(url),
                    options,
                    sender,
                    receiver,
                    socket.listeners.clone(),
                    socket.state.clone(),
                ));
            }
            Err(e) => {
                crate::log_error!("cannot connect to {} outside a tokio runtime: {}", url, e);
                set_state(
                    &socket.state,
                    ConnectionState::Failed {
                        reason: "no tokio runtime".into(),
                    },
                );
            }
        }

        socket
    }
}

/// A socket managed by a background task.
pub struct WsSocket {
    url: String,
    sender: UnboundedSender<EventFrame>,
    listeners: Arc<ListenerTable>,
    state: Arc<Mutex<ConnectionState>>,
}

impl EventSocket for WsSocket {
    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    fn off(&self, event: &str, id: ListenerId) {
        self.listeners.remove(event, id);
    }

    fn emit(&self, event: &str, args: Vec<Value>) {
        if let Err(e) = self.sender.unbounded_send(EventFrame::new(event, args)) {
            crate::log_warn!("emit on closed socket {}: {}", self.url, e);
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn set_state(state: &Mutex<ConnectionState>, next: ConnectionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

fn build_request(
    url: &str,
    options: &ConnectOptions,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Turn an incoming frame into listener arguments, appending an ack handle
/// when the peer asked for one.
fn frame_args(frame: &EventFrame, sender: &UnboundedSender<EventFrame>) -> Vec<EventArg> {
    let mut args: Vec<EventArg> = frame.args.iter().cloned().map(EventArg::Data).collect();
    if let Some(id) = frame.ack {
        let reply = sender.clone();
        args.push(EventArg::Ack(AckHandle::new(id, move |id, args| {
            if let Err(e) = reply.unbounded_send(EventFrame::ack_reply(id, args)) {
                crate::log_warn!("ack {} on closed socket: {}", id, e);
            }
        })));
    }
    args
}

async fn run_connection(
    url: String,
    options: ConnectOptions,
    sender: UnboundedSender<EventFrame>,
    mut receiver: UnboundedReceiver<EventFrame>,
    listeners: Arc<ListenerTable>,
    state: Arc<Mutex<ConnectionState>>,
) {
    let request = match build_request(&url, &options) {
        Ok(request) => request,
        Err(reason) => {
            crate::log_error!("invalid socket request for {}: {}", url, reason);
            set_state(&state, ConnectionState::Failed { reason });
            return;
        }
    };

    let ws_stream = match connect_async(request).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            crate::log_error!("WebSocket error for {}: {}", url, e);
            set_state(
                &state,
                ConnectionState::Failed {
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    set_state(&state, ConnectionState::Connected);
    crate::log_info!("WebSocket connected to {}", url);

    let (mut write, mut read) = ws_stream.split();

    let url_for_write = url.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if let Err(e) = write.send(Message::text(json)).await {
                        crate::log_error!("send to {} failed: {}", url_for_write, e);
                        break;
                    }
                }
                Err(e) => crate::log_error!("serialize failed: {}", e),
            }
        }
    });

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<EventFrame>(text.as_str()) {
                Ok(frame) => {
                    let args = frame_args(&frame, &sender);
                    let delivered = listeners.dispatch(&frame.event, args);
                    crate::log_debug!("event {} delivered to {} listener(s)", frame.event, delivered);
                }
                Err(e) => crate::log_error!("failed to parse frame from {}: {}", url, e),
            },
            Ok(Message::Close(_)) => {
                crate::log_info!("WebSocket to {} received close frame", url);
                break;
            }
            Ok(_) => {
                // Ping/pong are handled by tungstenite; binary frames are not part of the protocol.
            }
            Err(e) => {
                crate::log_error!("WebSocket read error from {}: {}", url, e);
                break;
            }
        }
    }

    write_task.abort();
    set_state(&state, ConnectionState::Disconnected);
    crate::log_info!("WebSocket to {} closed", url);
}
