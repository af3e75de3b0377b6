//! bridgekit client - one request layer over REST and event streams.
//!
//! Generated resource methods call [`ApiClient::request`] with a method, a
//! URL template, path and query parameters, an optional body and a streaming
//! flag. The same URL rules and the same [`SessionManager`] serve both
//! transports.
//!
//! ```rust,ignore
//! bridgekit_client::logging::init();
//! let config = ClientConfig::from_env();
//! let session = Arc::new(SessionManager::from_config(&config));
//! let api = ApiClient::new(config.clone(), session);
//!
//! api.login(&config.api_path("/Users"), json!({"email": e, "password": p}), Some("user")).await?;
//! let widget = api
//!     .rest(RequestDescriptor::get(config.api_path("/Widgets/:id")).path_param("id", "3"))
//!     .await?;
//! let updates = api.subscribe(RequestDescriptor::post(config.api_path("/Widgets")).streaming(true));
//! ```

pub mod logging;

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod http;
pub mod request;
pub mod storage;
pub mod testing;
pub mod ws;

pub use api_client::{ApiClient, NotificationStream, Observer, Reply};
pub use auth_session::{Session, SessionManager, SessionStore};
pub use bridgekit_shared::{channel_name, ApiError};
pub use config::ClientConfig;
pub use request::{Params, RequestDescriptor};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
