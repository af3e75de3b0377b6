//! Registry keeping one socket connection per base URL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::connection::SocketConnection;
use super::transport::{ConnectOptions, EventTransport};

/// Normalize a base URL for use as a key (strips trailing slashes)
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Maps each base URL to exactly one live [`SocketConnection`].
///
/// Connections are created lazily and live as long as the registry. There is
/// no eviction, reconnection or close; detaching listeners never touches the
/// shared connection.
pub struct SocketRegistry {
    transport: Arc<dyn EventTransport>,
    connections: Mutex<HashMap<String, Arc<SocketConnection>>>,
}

impl SocketRegistry {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            transport,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Return the connection for `base_url`, connecting on first use.
    ///
    /// `options` only matter for the call that creates the connection. The
    /// lock is held across check-then-create so concurrent first calls still
    /// produce a single connection.
    pub fn get_handler(&self, base_url: &str, options: ConnectOptions) -> Arc<SocketConnection> {
        let key = normalize_base_url(base_url);
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = connections.get(&key) {
            return existing.clone();
        }

        crate::log_info!("creating socket connection for {}", key);
        let socket = self.transport.connect(&key, options);
        let connection = Arc::new(SocketConnection::new(key.clone(), socket));
        connections.insert(key, connection.clone());
        connection
    }

    pub fn contains(&self, base_url: &str) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&normalize_base_url(base_url))
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
