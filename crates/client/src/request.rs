//! Request descriptors and URL construction.
//!
//! URL building is shared by both transports: the REST path sends to the
//! built URL, the streaming path derives its channel name from the
//! path-resolved template.

use reqwest::Method;
use serde_json::{Map, Value};

/// Path or query parameters, keyed by name.
pub type Params = Map<String, Value>;

/// Everything needed to dispatch one logical remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url_template: String,
    pub path_params: Params,
    pub query_params: Params,
    pub body: Option<Value>,
    pub use_streaming: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url_template: impl Into<String>) -> Self {
        Self {
            method,
            url_template: url_template.into(),
            path_params: Params::new(),
            query_params: Params::new(),
            body: None,
            use_streaming: false,
        }
    }

    pub fn get(url_template: impl Into<String>) -> Self {
        Self::new(Method::GET, url_template)
    }

    pub fn post(url_template: impl Into<String>) -> Self {
        Self::new(Method::POST, url_template)
    }

    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn with_path_params(mut self, params: Params) -> Self {
        self.path_params = params;
        self
    }

    pub fn with_query_params(mut self, params: Params) -> Self {
        self.query_params = params;
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn streaming(mut self, use_streaming: bool) -> Self {
        self.use_streaming = use_streaming;
        self
    }

    /// Template with path params substituted and the query string appended.
    pub fn url(&self) -> String {
        build_url(&self.url_template, &self.path_params, &self.query_params)
    }
}

/// Text form of a parameter value: strings verbatim, everything else as JSON.
fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `:name` placeholders that end at a `/` or at the end of the template.
///
/// A placeholder followed by any other character is a different name
/// (`:id` never matches inside `:idx`), so it is left alone.
pub fn resolve_path(template: &str, params: &Params) -> String {
    let mut url = template.to_string();
    for (key, value) in params {
        url = substitute(&url, &format!(":{key}"), &param_text(value));
    }
    url
}

fn substitute(url: &str, placeholder: &str, value: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(idx) = rest.find(placeholder) {
        let end = idx + placeholder.len();
        out.push_str(&rest[..idx]);
        if end == rest.len() || rest[end..].starts_with('/') {
            out.push_str(value);
        } else {
            out.push_str(placeholder);
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

/// `key=value` pairs joined by `&`, keys sorted, `null` values skipped.
///
/// Objects and arrays are rendered as JSON text before percent-encoding.
pub fn serialize_query(params: &Params) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|key| match &params[key] {
            Value::Null => None,
            value => Some(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&param_text(value))
            )),
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub fn build_url(template: &str, path_params: &Params, query_params: &Params) -> String {
    let url = resolve_path(template, path_params);
    let query = serialize_query(query_params);
    if query.is_empty() {
        url
    } else {
        format!("{url}?{query}")
    }
}

/// Join a possibly relative URL onto `base_url`; absolute URLs pass through.
pub fn join_base(base_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if base_url.is_empty() {
        if url.starts_with('/') {
            url.to_string()
        } else {
            format!("/{url}")
        }
    } else {
        let base = base_url.trim_end_matches('/');
        let path = url.trim_start_matches('/');
        format!("{base}/{path}")
    }
}
