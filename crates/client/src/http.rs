//! HTTP transport seam.
//!
//! The dispatcher only needs "send this, give me status and body back". The
//! default implementation sits on `reqwest`; tests and embedders can supply
//! their own.

use async_trait::async_trait;
use bridgekit_shared::HttpFailure;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// `(method, url, headers, body) -> response-or-error`.
///
/// Implementations return `Ok` for every response that arrived, whatever the
/// status; `Err` is reserved for exchanges that produced no response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let mut rb = self.client.request(request.method, &request.url);

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpFailure::Transport(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpFailure::Transport(format!("invalid header value: {e}")))?;
            rb = rb.header(name, value);
        }

        if let Some(body) = request.body {
            rb = rb
                .header(CONTENT_TYPE, "application/json")
                .body(body);
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| HttpFailure::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| HttpFailure::Transport(format!("failed to read body: {e}")))?;

        Ok(HttpResponse { status, body })
    }
}
