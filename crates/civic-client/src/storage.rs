//! Session persistence
//!
//! A flat string key-value store, mirroring the browser storage the portal
//! pages share. The session lives under five keys:
//!
//! | key | value |
//! |---|---|
//! | `token` | access token |
//! | `refreshToken` | refresh token |
//! | `role` | role wire name |
//! | `username` | login name |
//! | `user` | JSON-encoded profile |
//!
//! Store operations are synchronous so that the client can read the refresh
//! token and claim the refresh slot without yielding in between.

use crate::types::{Role, Session};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Access token key
pub const KEY_TOKEN: &str = "token";
/// Refresh token key
pub const KEY_REFRESH_TOKEN: &str = "refreshToken";
/// Role key
pub const KEY_ROLE: &str = "role";
/// Username key
pub const KEY_USERNAME: &str = "username";
/// Profile key
pub const KEY_USER: &str = "user";

/// Every key owned by the session
pub const SESSION_KEYS: [&str; 5] = [KEY_TOKEN, KEY_REFRESH_TOKEN, KEY_ROLE, KEY_USERNAME, KEY_USER];

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Backing file could not be read or written
    #[error("I/O failure on {path}: {reason}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Backing data is not a string map
    #[error("corrupt session data: {0}")]
    Corrupt(String),
}

/// Client-side key-value store
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Read a key
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a key
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key; missing keys are not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Stored access token
pub fn access_token(store: &dyn SessionStore) -> Result<Option<String>, StorageError> {
    store.get(KEY_TOKEN)
}

/// Stored refresh token
pub fn refresh_token(store: &dyn SessionStore) -> Result<Option<String>, StorageError> {
    store.get(KEY_REFRESH_TOKEN)
}

/// Persist a full session
pub fn save_session(store: &dyn SessionStore, session: &Session) -> Result<(), StorageError> {
    store.set(KEY_TOKEN, &session.access_token)?;
    match &session.refresh_token {
        Some(token) => store.set(KEY_REFRESH_TOKEN, token)?,
        None => store.remove(KEY_REFRESH_TOKEN)?,
    }
    store.set(KEY_ROLE, session.role.as_str())?;
    store.set(KEY_USERNAME, &session.username)?;
    match &session.user {
        Some(user) => store.set(KEY_USER, &user.to_string())?,
        None => store.remove(KEY_USER)?,
    }
    Ok(())
}

/// Persist refreshed tokens; a missing rotated refresh token keeps the old one
pub fn save_tokens(
    store: &dyn SessionStore,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<(), StorageError> {
    store.set(KEY_TOKEN, access_token)?;
    if let Some(token) = refresh_token {
        store.set(KEY_REFRESH_TOKEN, token)?;
    }
    Ok(())
}

/// Load the session, if a token and a known role are stored
pub fn load_session(store: &dyn SessionStore) -> Result<Option<Session>, StorageError> {
    let Some(access_token) = store.get(KEY_TOKEN)? else {
        return Ok(None);
    };
    let Some(role) = store.get(KEY_ROLE)?.and_then(|r| r.parse::<Role>().ok()) else {
        return Ok(None);
    };
    let user = match store.get(KEY_USER)? {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt(format!("user: {e}")))?,
        ),
        None => None,
    };

    Ok(Some(Session {
        access_token,
        refresh_token: store.get(KEY_REFRESH_TOKEN)?,
        role,
        username: store.get(KEY_USERNAME)?.unwrap_or_default(),
        user,
    }))
}

/// Remove every session key
pub fn clear_session(store: &dyn SessionStore) -> Result<(), StorageError> {
    for key in SESSION_KEYS {
        store.remove(key)?;
    }
    Ok(())
}

/// In-memory store, lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON-file store, survives process restarts
///
/// The whole map is rewritten through a sibling temp file on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_error(&path, &e)),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
        }
        let text = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|e| io_error(&tmp, &e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, &e))
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn full_session() -> Session {
        Session::new("T1", Role::Tourist, "ana")
            .with_refresh_token("R1")
            .with_user(json!({"id": 7, "email": "ana@city.test"}))
    }

    #[test]
    fn session_round_trip_uses_flat_keys() {
        let store = MemoryStore::new();
        save_session(&store, &full_session()).unwrap();

        assert_eq!(store.get(KEY_TOKEN).unwrap().as_deref(), Some("T1"));
        assert_eq!(store.get(KEY_REFRESH_TOKEN).unwrap().as_deref(), Some("R1"));
        assert_eq!(store.get(KEY_ROLE).unwrap().as_deref(), Some("TOURIST"));
        assert_eq!(store.get(KEY_USERNAME).unwrap().as_deref(), Some("ana"));
        assert_eq!(load_session(&store).unwrap(), Some(full_session()));
    }

    #[test]
    fn load_requires_token_and_known_role() {
        let store = MemoryStore::new();
        assert_eq!(load_session(&store).unwrap(), None);

        store.set(KEY_TOKEN, "T1").unwrap();
        assert_eq!(load_session(&store).unwrap(), None);

        store.set(KEY_ROLE, "WIZARD").unwrap();
        assert_eq!(load_session(&store).unwrap(), None);

        store.set(KEY_ROLE, "STUDENT").unwrap();
        assert_eq!(load_session(&store).unwrap().map(|s| s.role), Some(Role::Student));
    }

    #[test]
    fn save_tokens_keeps_refresh_token_without_rotation() {
        let store = MemoryStore::new();
        save_session(&store, &full_session()).unwrap();

        save_tokens(&store, "T2", None).unwrap();
        assert_eq!(access_token(&store).unwrap().as_deref(), Some("T2"));
        assert_eq!(refresh_token(&store).unwrap().as_deref(), Some("R1"));

        save_tokens(&store, "T3", Some("R2")).unwrap();
        assert_eq!(refresh_token(&store).unwrap().as_deref(), Some("R2"));
    }

    #[test]
    fn clear_removes_only_session_keys() {
        let store = MemoryStore::new();
        save_session(&store, &full_session()).unwrap();
        store.set("theme", "dark").unwrap();

        clear_session(&store).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        {
            let store = FileStore::open(&path).unwrap();
            save_session(&store, &full_session()).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(load_session(&reopened).unwrap(), Some(full_session()));

        clear_session(&reopened).unwrap();
        let again = FileStore::open(&path).unwrap();
        assert_eq!(load_session(&again).unwrap(), None);
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(FileStore::open(&path), Err(StorageError::Corrupt(_))));
    }
}
