//! Authentication session state with durable persistence.
//!
//! [`SessionManager`] is the single source of truth for who is logged in.
//! It is an owned value, usually shared as `Arc<SessionManager>` between the
//! dispatcher and the application, so separate sessions can coexist in one
//! process.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::storage::KeyValueStorage;

pub const ACCESS_TOKEN_KEY: &str = "accessTokenId";
pub const CURRENT_USER_KEY: &str = "currentUserId";
pub const REMEMBER_ME_KEY: &str = "rememberMe";

/// The authenticated identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token_id: Option<String>,
    pub user_id: Option<String>,
    pub remember_me: bool,
    /// Last fetched user record. Never persisted.
    pub cached_user_profile: Option<Value>,
}

/// Namespaced access to the persisted session entries.
///
/// Storage failures stop here: they are logged and read as "no value".
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    namespace: String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.namespace, name)
    }

    /// Read an entry. Empty strings and storage errors both mean absent.
    pub fn load(&self, name: &str) -> Option<String> {
        let key = self.key(name);
        match self.storage.get_string(&key) {
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(value),
            Err(e) => {
                crate::log_warn!("session storage read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Write an entry; `None` writes the empty marker.
    pub fn persist(&self, name: &str, value: Option<&str>) {
        let key = self.key(name);
        if let Err(e) = self.storage.set_string(&key, value.unwrap_or_default()) {
            crate::log_warn!("session storage write failed for {}: {}", key, e);
        }
    }
}

/// Holds the in-memory [`Session`] and commits it to a [`SessionStore`] on request.
pub struct SessionManager {
    store: SessionStore,
    state: RwLock<Session>,
}

impl SessionManager {
    /// Create a manager and restore whatever the store holds.
    pub fn new(store: SessionStore) -> Self {
        let manager = Self {
            store,
            state: RwLock::new(Session::default()),
        };
        manager.load_from_storage();
        manager
    }

    /// Manager backed by the storage and namespace named in `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(SessionStore::new(
            config.storage(),
            config.storage_namespace.clone(),
        ))
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the identity fields with what the store holds.
    pub fn load_from_storage(&self) {
        let (token_id, user_id) = match (
            self.store.load(ACCESS_TOKEN_KEY),
            self.store.load(CURRENT_USER_KEY),
        ) {
            (Some(token_id), Some(user_id)) => (Some(token_id), Some(user_id)),
            (None, None) => (None, None),
            _ => {
                crate::log_warn!("stored session has a token or a user id but not both, ignoring it");
                (None, None)
            }
        };
        let remember_me = self.store.load(REMEMBER_ME_KEY).as_deref() == Some("true");

        crate::log_debug!(
            "session loaded (token present: {}, user: {:?})",
            token_id.is_some(),
            user_id
        );

        let mut state = self.write();
        state.token_id = token_id;
        state.user_id = user_id;
        state.remember_me = remember_me;
    }

    /// Set token, user id and profile together. Call [`save`](Self::save) to persist.
    pub fn set_user(
        &self,
        token_id: impl Into<String>,
        user_id: impl Into<String>,
        profile: Option<Value>,
    ) {
        let mut state = self.write();
        state.token_id = Some(token_id.into());
        state.user_id = Some(user_id.into());
        state.cached_user_profile = profile;
    }

    /// Forget the identity in memory. Storage is untouched.
    pub fn clear_user(&self) {
        let mut state = self.write();
        state.token_id = None;
        state.user_id = None;
        state.cached_user_profile = None;
    }

    pub fn set_remember_me(&self, remember_me: bool) {
        self.write().remember_me = remember_me;
    }

    /// Replace the cached profile only.
    pub fn set_current_user_data(&self, profile: Option<Value>) {
        self.write().cached_user_profile = profile;
    }

    /// Commit token, user id and remember flag to storage.
    pub fn save(&self) {
        let state = self.snapshot();
        self.store.persist(ACCESS_TOKEN_KEY, state.token_id.as_deref());
        self.store.persist(CURRENT_USER_KEY, state.user_id.as_deref());
        self.store
            .persist(REMEMBER_ME_KEY, state.remember_me.then_some("true"));
        crate::log_debug!("session saved (user: {:?})", state.user_id);
    }

    /// Write the empty marker for every persisted entry, whatever memory holds.
    pub fn clear_storage(&self) {
        for name in [ACCESS_TOKEN_KEY, CURRENT_USER_KEY, REMEMBER_ME_KEY] {
            self.store.persist(name, None);
        }
        crate::log_debug!("session storage cleared");
    }

    pub fn access_token_id(&self) -> Option<String> {
        self.read().token_id.clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn current_user_data(&self) -> Option<Value> {
        self.read().cached_user_profile.clone()
    }

    pub fn remember_me(&self) -> bool {
        self.read().remember_me
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().token_id.is_some()
    }

    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn store(storage: &MemoryStorage) -> SessionStore {
        SessionStore::new(Arc::new(storage.clone()), "$LoopBack$")
    }

    #[test]
    fn empty_storage_loads_anonymous_session() {
        let manager = SessionManager::new(store(&MemoryStorage::new()));
        assert_eq!(manager.snapshot(), Session::default());
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn saved_user_survives_a_fresh_load() {
        let storage = MemoryStorage::new();
        let manager = SessionManager::new(store(&storage));
        manager.set_user("tok1", "u1", Some(json!({})));
        manager.save();

        let restored = SessionManager::new(store(&storage));
        assert_eq!(restored.access_token_id().as_deref(), Some("tok1"));
        assert_eq!(restored.current_user_id().as_deref(), Some("u1"));
        assert_eq!(restored.current_user_data(), None);
        assert_eq!(
            storage.raw("$LoopBack$accessTokenId").as_deref(),
            Some("tok1")
        );
    }

    #[test]
    fn half_stored_identity_loads_anonymous() {
        let storage = MemoryStorage::new();
        storage.set_string("$LoopBack$accessTokenId", "tok1").unwrap();
        storage.set_string("$LoopBack$currentUserId", "").unwrap();

        let manager = SessionManager::new(store(&storage));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.access_token_id(), None);

        storage.set_string("$LoopBack$accessTokenId", "").unwrap();
        storage.set_string("$LoopBack$currentUserId", "u1").unwrap();
        manager.load_from_storage();
        assert_eq!(manager.current_user_id(), None);
    }

    #[test]
    fn set_user_alone_does_not_persist() {
        let storage = MemoryStorage::new();
        let manager = SessionManager::new(store(&storage));
        manager.set_user("tok1", "u1", None);

        let restored = SessionManager::new(store(&storage));
        assert_eq!(restored.access_token_id(), None);
    }

    #[test]
    fn clear_user_and_clear_storage_empty_both_layers() {
        let storage = MemoryStorage::new();
        let manager = SessionManager::new(store(&storage));
        manager.set_user("tok1", "u1", None);
        manager.set_remember_me(true);
        manager.save();

        manager.clear_user();
        manager.clear_storage();
        assert_eq!(manager.access_token_id(), None);

        let restored = SessionManager::new(store(&storage));
        assert_eq!(restored.access_token_id(), None);
        assert_eq!(restored.current_user_id(), None);
        assert!(!restored.remember_me());
        assert_eq!(storage.raw("$LoopBack$rememberMe").as_deref(), Some(""));
    }

    #[test]
    fn clear_storage_ignores_in_memory_state() {
        let storage = MemoryStorage::new();
        let manager = SessionManager::new(store(&storage));
        manager.set_user("tok1", "u1", None);
        manager.save();
        manager.clear_storage();

        assert_eq!(manager.access_token_id().as_deref(), Some("tok1"));
        assert_eq!(SessionManager::new(store(&storage)).access_token_id(), None);
    }

    #[test]
    fn remember_me_round_trips() {
        let storage = MemoryStorage::new();
        let manager = SessionManager::new(store(&storage));
        manager.set_user("t", "u", None);
        manager.set_remember_me(true);
        manager.save();
        assert!(SessionManager::new(store(&storage)).remember_me());
    }

    #[test]
    fn unavailable_storage_degrades_to_anonymous() {
        let manager = SessionManager::new(store(&MemoryStorage::unavailable()));
        assert!(!manager.is_authenticated());

        manager.set_user("tok1", "u1", None);
        manager.save();
        manager.clear_storage();
        assert_eq!(manager.access_token_id().as_deref(), Some("tok1"));
    }

    #[test]
    fn profile_update_leaves_identity_alone() {
        let manager = SessionManager::new(store(&MemoryStorage::new()));
        manager.set_user("tok1", "u1", None);
        manager.set_current_user_data(Some(json!({"email": "a@example.com"})));
        assert_eq!(manager.access_token_id().as_deref(), Some("tok1"));
        assert_eq!(
            manager.current_user_data(),
            Some(json!({"email": "a@example.com"}))
        );
    }
}
