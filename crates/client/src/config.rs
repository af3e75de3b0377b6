//! Client configuration from environment variables.

use std::path::PathBuf;
use std::sync::Arc;

use crate::storage::{default_storage_dir, FileStorage, KeyValueStorage, MemoryStorage};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_API_VERSION: &str = "api";
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";
pub const DEFAULT_STORAGE_NAMESPACE: &str = "$LoopBack$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Scheme + host (+ port) of the backend. Also keys the socket connection.
    pub base_url: String,
    /// Path segment between the base URL and resource paths.
    pub api_version: String,
    /// Header carrying the raw access token.
    pub auth_header: String,
    /// Prefix for every persisted session key.
    pub storage_namespace: String,
    /// Where [`FileStorage`] keeps session files. `None` means the platform config dir.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Build configuration from the environment.
    ///
    /// Environment variables:
    /// - `BRIDGEKIT_BASE_URL` (default: "http://localhost:3000")
    /// - `BRIDGEKIT_API_VERSION` (default: "api")
    /// - `BRIDGEKIT_AUTH_HEADER` (default: "Authorization")
    /// - `BRIDGEKIT_STORAGE_NAMESPACE` (default: "$LoopBack$")
    /// - `BRIDGEKIT_STORAGE_DIR` (default: platform config dir + "/bridgekit")
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str, default: String| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };

        Self {
            base_url: var("BRIDGEKIT_BASE_URL", defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            api_version: var("BRIDGEKIT_API_VERSION", defaults.api_version),
            auth_header: var("BRIDGEKIT_AUTH_HEADER", defaults.auth_header),
            storage_namespace: var("BRIDGEKIT_STORAGE_NAMESPACE", defaults.storage_namespace),
            storage_dir: lookup("BRIDGEKIT_STORAGE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_auth_header(mut self, auth_header: impl Into<String>) -> Self {
        self.auth_header = auth_header.into();
        self
    }

    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Absolute URL template for a resource path, e.g. `/Widgets/:id` becomes
    /// `http://localhost:3000/api/Widgets/:id`.
    pub fn api_path(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let version = self.api_version.trim_matches('/');
        let path = path.trim_start_matches('/');
        if version.is_empty() {
            format!("{base}/{path}")
        } else {
            format!("{base}/{version}/{path}")
        }
    }

    /// Durable storage for this configuration.
    ///
    /// Falls back to process-local storage when no directory can be resolved,
    /// so the session simply does not survive a restart.
    pub fn storage(&self) -> Arc<dyn KeyValueStorage> {
        match self.storage_dir.clone().or_else(default_storage_dir) {
            Some(dir) => Arc::new(FileStorage::new(dir)),
            None => {
                crate::log_warn!("no storage directory available, session will not persist");
                Arc::new(MemoryStorage::new())
            }
        }
    }
}
