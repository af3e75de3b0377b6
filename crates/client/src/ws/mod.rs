//! Streaming transport: one shared socket per backend, many logical channels.
//!
//! ```text
//!   ApiClient::subscribe("[GET]/widgets", ...)   ApiClient::subscribe("[POST]/widgets", ...)
//!                  │                                          │
//!                  └──────────────┬───────────────────────────┘
//!                                 ▼
//!                      ┌─────────────────────┐
//!                      │   SocketRegistry    │  one entry per base URL
//!                      └─────────────────────┘
//!                                 │
//!                                 ▼
//!                      ┌─────────────────────┐
//!                      │  SocketConnection   │  strips ack handles
//!                      └─────────────────────┘
//!                                 │
//!                                 ▼
//!                      ┌─────────────────────┐
//!                      │  EventSocket impl   │  WsSocket, MemorySocket, ...
//!                      └─────────────────────┘
//! ```

mod connection;
mod manager;
mod native;
mod transport;

pub use connection::{strip_ack, SocketConnection};
pub use manager::{normalize_base_url, SocketRegistry};
pub use native::{http_to_ws, WsSocket, WsTransport};
pub use transport::{
    AckHandle, ConnectOptions, ConnectionState, EventArg, EventSocket, EventTransport, Listener,
    ListenerId, ListenerTable,
};
