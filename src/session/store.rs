//! Durable session state.
//!
//! [`SessionStore`] holds the credentials and session identifier the rest of
//! the agent reads. Reads come from an in-memory snapshot, so writes are
//! visible to every thread as soon as they return. Each write goes to a
//! [`KeyValueStore`] first and reaches the snapshot only if it succeeded, so
//! memory and disk never disagree after a failed write.
//!
//! Only the session controller mutates the store; the mutators are
//! crate-private.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const KEY_JWT: &str = "jwt_token";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_SESSION_ID: &str = "session_id";
pub const KEY_IS_CONNECTED: &str = "is_connected";

/// Credentials obtained from a successful pairing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub jwt: String,
    pub user_id: String,
}

impl AuthToken {
    /// Token prefix that is safe to log.
    pub fn redacted(&self) -> String {
        redact(&self.jwt)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("jwt", &self.redacted())
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Shorten a secret for log output.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(8).collect();
    format!("{prefix}…")
}

/// Storage errors.
#[derive(Debug)]
pub enum StoreError {
    IoError(String),
    ParseError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "Store IO error: {e}"),
            StoreError::ParseError(e) => write!(f, "Store parse error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A durable string key-value store. Last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Set `key`, or remove it when `value` is `None`.
    fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// Volatile store, for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut entries = self.entries();
        match value {
            Some(v) => entries.insert(key.to_string(), v.to_string()),
            None => entries.remove(key),
        };
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries().clear();
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let entries = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| StoreError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| StoreError::ParseError(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::ParseError(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| StoreError::IoError(e.to_string()))
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut entries = self.entries();
        let mut next = entries.clone();
        match value {
            Some(v) => next.insert(key.to_string(), v.to_string()),
            None => next.remove(key),
        };
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries();
        self.persist(&BTreeMap::new())?;
        entries.clear();
        Ok(())
    }
}

/// In-memory view of the persisted session fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub jwt: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub is_connected: bool,
}

impl SessionSnapshot {
    /// Token and user id are both present.
    pub fn is_authenticated(&self) -> bool {
        non_empty(&self.jwt) && non_empty(&self.user_id)
    }

    /// Authenticated, with a live session id and the connected flag set.
    pub fn has_active_session(&self) -> bool {
        self.is_authenticated() && non_empty(&self.session_id) && self.is_connected
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// Process-wide session state.
pub struct SessionStore {
    backend: Box<dyn KeyValueStore>,
    current: RwLock<SessionSnapshot>,
}

impl SessionStore {
    /// Initialize from whatever the backing store already holds.
    pub fn open(backend: Box<dyn KeyValueStore>) -> Self {
        let current = SessionSnapshot {
            jwt: backend.get(KEY_JWT),
            user_id: backend.get(KEY_USER_ID),
            session_id: backend.get(KEY_SESSION_ID),
            is_connected: backend
                .get(KEY_IS_CONNECTED)
                .is_some_and(|v| v == "true"),
        };
        Self {
            backend,
            current: RwLock::new(current),
        }
    }

    /// A store with no durable backing.
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryStore::new()))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().clone()
    }

    /// The stored credentials, if both parts are present.
    pub fn token(&self) -> Option<AuthToken> {
        let current = self.read();
        match (&current.jwt, &current.user_id) {
            (Some(jwt), Some(user_id)) if !jwt.is_empty() => Some(AuthToken {
                jwt: jwt.clone(),
                user_id: user_id.clone(),
            }),
            _ => None,
        }
    }

    pub fn jwt(&self) -> Option<String> {
        self.read().jwt.clone().filter(|t| !t.is_empty())
    }

    pub fn user_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.read().session_id.clone().filter(|s| !s.is_empty())
    }

    pub fn is_connected(&self) -> bool {
        self.read().is_connected
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    pub fn has_active_session(&self) -> bool {
        self.read().has_active_session()
    }

    pub(crate) fn set_auth(&self, token: &AuthToken) -> Result<(), StoreError> {
        let mut current = self.write();
        self.write_through(&[
            (KEY_JWT, Some(token.jwt.as_str())),
            (KEY_USER_ID, Some(token.user_id.as_str())),
        ])?;
        current.jwt = Some(token.jwt.clone());
        current.user_id = Some(token.user_id.clone());
        Ok(())
    }

    pub(crate) fn set_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut current = self.write();
        self.write_through(&[
            (KEY_SESSION_ID, Some(session_id)),
            (KEY_IS_CONNECTED, Some("true")),
        ])?;
        current.session_id = Some(session_id.to_string());
        current.is_connected = true;
        Ok(())
    }

    /// Forget the session but keep the credentials.
    pub(crate) fn clear_session(&self) -> Result<(), StoreError> {
        let mut current = self.write();
        self.write_through(&[(KEY_SESSION_ID, None), (KEY_IS_CONNECTED, None)])?;
        current.session_id = None;
        current.is_connected = false;
        Ok(())
    }

    /// Forget everything.
    pub(crate) fn clear(&self) -> Result<(), StoreError> {
        let mut current = self.write();
        self.backend.clear()?;
        *current = SessionSnapshot::default();
        Ok(())
    }

    /// Write `entries` in order. If one fails, the keys already written are
    /// restored to their previous values before the error is returned.
    fn write_through(&self, entries: &[(&'static str, Option<&str>)]) -> Result<(), StoreError> {
        let mut written: Vec<(&'static str, Option<String>)> = Vec::with_capacity(entries.len());
        for &(key, value) in entries {
            let previous = self.backend.get(key);
            if let Err(e) = self.backend.set(key, value) {
                for (key, previous) in written.iter().rev() {
                    let _ = self.backend.set(key, previous.as_deref());
                }
                return Err(e);
            }
            written.push((key, previous));
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionSnapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionSnapshot> {
        self.current.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token() -> AuthToken {
        AuthToken {
            jwt: "eyJhbGciOiJIUzI1NiJ9.payload".to_string(),
            user_id: "user-1".to_string(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let store = SessionStore::in_memory();
        assert!(!store.is_authenticated());
        assert_eq!(store.token(), None);

        store.set_auth(&token()).unwrap();
        assert!(store.is_authenticated());
        assert!(!store.has_active_session());

        store.set_session("sess-1").unwrap();
        assert!(store.has_active_session());
        assert_eq!(store.session_id().as_deref(), Some("sess-1"));

        store.clear_session().unwrap();
        assert_eq!(store.session_id(), None);
        assert!(!store.is_connected());
        assert_eq!(store.token(), Some(token()));

        store.clear().unwrap();
        assert_eq!(store.snapshot(), SessionSnapshot::default());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let store = SessionStore::open(Box::new(JsonFileStore::open(path.clone()).unwrap()));
            store.set_auth(&token()).unwrap();
            store.set_session("sess-9").unwrap();
        }

        let reopened = SessionStore::open(Box::new(JsonFileStore::open(path.clone()).unwrap()));
        assert_eq!(reopened.token(), Some(token()));
        assert_eq!(reopened.session_id().as_deref(), Some("sess-9"));
        assert!(reopened.has_active_session());

        reopened.clear().unwrap();
        let cleared = SessionStore::open(Box::new(JsonFileStore::open(path).unwrap()));
        assert!(!cleared.is_authenticated());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(path),
            Err(StoreError::ParseError(_))
        ));
    }

    /// Refuses writes to one key.
    struct FailingStore {
        inner: std::sync::Arc<MemoryStore>,
        fail_key: &'static str,
    }

    impl KeyValueStore for FailingStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
            if key == self.fail_key {
                return Err(StoreError::IoError("disk full".to_string()));
            }
            self.inner.set(key, value)
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_failed_write_changes_nothing() {
        let backend = std::sync::Arc::new(MemoryStore::new());
        let store = SessionStore::open(Box::new(FailingStore {
            inner: backend.clone(),
            fail_key: KEY_USER_ID,
        }));

        assert!(matches!(store.set_auth(&token()), Err(StoreError::IoError(_))));
        assert_eq!(store.token(), None);
        assert!(!store.is_authenticated());
        // The jwt written before the failure was rolled back
        assert_eq!(backend.get(KEY_JWT), None);
        assert_eq!(backend.get(KEY_USER_ID), None);
    }

    #[test]
    fn test_failed_session_write_keeps_previous_session() {
        let backend = std::sync::Arc::new(MemoryStore::new());
        backend.set(KEY_SESSION_ID, Some("sess-1")).unwrap();
        let store = SessionStore::open(Box::new(FailingStore {
            inner: backend.clone(),
            fail_key: KEY_IS_CONNECTED,
        }));

        assert!(store.set_session("sess-2").is_err());
        assert_eq!(store.session_id().as_deref(), Some("sess-1"));
        assert!(!store.is_connected());
        assert_eq!(backend.get(KEY_SESSION_ID).as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let debug = format!("{:?}", token());
        assert!(!debug.contains("payload"));
        assert!(debug.contains("user-1"));
    }
}
