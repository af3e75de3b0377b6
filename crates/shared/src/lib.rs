//! Shared types for the bridgekit request layer.
//!
//! Anything both sides of the wire must agree on lives here: the normalized
//! error value, the channel naming rule and the event frame used by the
//! bundled WebSocket transport.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
