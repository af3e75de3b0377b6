//! Normalized error value and the translator that produces it from failed HTTP exchanges.

use serde_json::Value;
use thiserror::Error;

/// The single error value every failed call resolves to.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The backend answered with a structured `error` body field, surfaced verbatim.
    #[error("remote error (HTTP {status}): {error}")]
    Remote { status: u16, error: Value },
    /// Generic fallback: unparsable error bodies and transport failures.
    #[error("Server error{}", detail_suffix(.status, .detail))]
    Server {
        status: Option<u16>,
        detail: Option<String>,
    },
    /// A successful response whose body is not valid JSON.
    #[error("deserialization error: {0}")]
    Deserialize(String),
    /// A request body that could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
}

fn detail_suffix(status: &Option<u16>, detail: &Option<String>) -> String {
    match (status, detail) {
        (Some(status), Some(detail)) => format!(" (HTTP {status}): {detail}"),
        (Some(status), None) => format!(" (HTTP {status})"),
        (None, Some(detail)) => format!(": {detail}"),
        (None, None) => String::new(),
    }
}

impl ApiError {
    pub fn server_error(status: Option<u16>, detail: Option<String>) -> Self {
        ApiError::Server { status, detail }
    }

    /// HTTP status of the failed exchange, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Remote { status, .. } => Some(*status),
            ApiError::Server { status, .. } => *status,
            _ => None,
        }
    }

    /// The backend's `error` value, when the failure carried one.
    pub fn remote_error(&self) -> Option<&Value> {
        match self {
            ApiError::Remote { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Shortcut for the conventional `error.message` string.
    pub fn remote_message(&self) -> Option<&str> {
        self.remote_error()?.get("message")?.as_str()
    }
}

/// A failed HTTP exchange before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// A response arrived with a non-2xx status.
    Status { status: u16, body: String },
    /// No usable response: connection refused, reset, unreadable body.
    Transport(String),
}

/// Pull the `error` field out of a JSON body. `null` counts as absent.
pub fn try_error_field(body: &str) -> Option<Value> {
    let parsed = serde_json::from_str::<Value>(body).ok()?;
    match parsed.get("error") {
        Some(Value::Null) | None => None,
        Some(error) => Some(error.clone()),
    }
}

/// Collapse any failed exchange into one [`ApiError`].
///
/// Never fails itself: bodies without a usable `error` field and transport
/// failures all become [`ApiError::Server`].
pub fn translate_failure(failure: &HttpFailure) -> ApiError {
    match failure {
        HttpFailure::Status { status, body } => match try_error_field(body) {
            Some(error) => ApiError::Remote {
                status: *status,
                error,
            },
            None => ApiError::server_error(Some(*status), None),
        },
        HttpFailure::Transport(reason) => ApiError::server_error(None, Some(reason.clone())),
    }
}
