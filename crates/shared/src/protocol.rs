//! Channel naming and event frame definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used to answer a frame that requested an acknowledgement.
pub const ACK_EVENT: &str = "ack";

/// Derive the subscription key for a method + resolved URL pair.
///
/// Format: `[{METHOD}]{url}` with every `?` removed. Publishers and
/// subscribers must produce this byte for byte, so the method is uppercased.
pub fn channel_name(method: &str, url: &str) -> String {
    format!("[{}]{}", method.to_ascii_uppercase(), url).replace('?', "")
}

/// One event on the wire, in either direction.
///
/// A frame with `ack` set asks the receiver to answer with an
/// [`ACK_EVENT`] frame carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
            ack: None,
        }
    }

    pub fn with_ack(mut self, id: u64) -> Self {
        self.ack = Some(id);
        self
    }

    /// Reply frame for an acknowledgement request.
    pub fn ack_reply(id: u64, args: Vec<Value>) -> Self {
        Self::new(ACK_EVENT, args).with_ack(id)
    }
}
