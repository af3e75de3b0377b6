//! Durable key-value storage for session state.
//!
//! Values are plain text. An absent value reads back as an empty string, so
//! "never set" and "set to empty" are the same thing.
//!
//! - [`FileStorage`]: one file per key, by default in the platform config dir:
//!   - Linux: `~/.config/bridgekit/`
//!   - macOS: `~/Library/Application Support/bridgekit/`
//!   - Windows: `%APPDATA%\bridgekit\`
//! - [`MemoryStorage`]: process-local, for tests and throwaway sessions.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// The durable storage contract the session layer consumes.
pub trait KeyValueStorage: Send + Sync {
    /// Read a value; absent keys yield `""`.
    fn get_string(&self, key: &str) -> Result<String, StorageError>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Directory used when no explicit storage dir is configured.
pub fn default_storage_dir() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("bridgekit"))
}

/// Stores each key as a file named after the sanitized key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage in the platform config directory, if the platform has one.
    pub fn in_config_dir() -> Option<Self> {
        default_storage_dir().map(Self::new)
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.txt"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_string(&self, key: &str) -> Result<String, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        std::fs::write(self.path_for(key), value).map_err(io_err)
    }
}

/// In-process storage. Clones share the same entries.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    available: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: Arc::default(),
            available: true,
        }
    }

    /// A backend where every call fails, like a locked-down browser profile.
    pub fn unavailable() -> Self {
        Self {
            entries: Arc::default(),
            available: false,
        }
    }

    /// Raw entry lookup, bypassing the empty-string convention.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory storage disabled".into()))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_string(&self, key: &str) -> Result<String, StorageError> {
        self.check()?;
        Ok(self.raw(key).unwrap_or_default())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
