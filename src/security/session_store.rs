use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

pub const ACCESS_KEY: &str = "access";
pub const REFRESH_KEY: &str = "refresh";
pub const USER_KEY: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error on {key}: {message}")]
    Io { key: String, message: String },
    #[error("cannot encode {key}: {message}")]
    Encode { key: String, message: String },
}

/// Durable key-value medium behind the session.
///
/// Absence of a key means "no value". Implementations must not store a null
/// marker: removing is the only way to clear an entry.
pub trait KeyValueStorage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// One file per entry under a session directory: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn io_error(key: &str, err: std::io::Error) -> StorageError {
        StorageError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

impl KeyValueStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.entry_path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(key, err)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(key, e))?;
        let target = self.entry_path(key);
        // unique per writer so concurrent writes of one key never share a tmp file
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));
        fs::write(&tmp, value).map_err(|e| Self::io_error(key, e))?;
        fs::rename(&tmp, &target).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Self::io_error(key, e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_error(key, err)),
        }
    }
}

/// The stored credential pair. Either side may be absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

// Tokens never reach logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &self.access.as_ref().map(|_| "<redacted>"))
            .field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Token pair and cached user profile, persisted as three independent JSON
/// entries.
///
/// Reads never fail: a missing entry, an unreadable medium or malformed JSON
/// all read as `None`, so corrupt storage cannot break request dispatch.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore").field("tokens", &self.get()).finish()
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn get(&self) -> TokenPair {
        TokenPair {
            access: self.read_json(ACCESS_KEY),
            refresh: self.read_json(REFRESH_KEY),
        }
    }

    pub fn access(&self) -> Option<String> {
        self.read_json(ACCESS_KEY)
    }

    pub fn refresh(&self) -> Option<String> {
        self.read_json(REFRESH_KEY)
    }

    pub fn user(&self) -> Option<Value> {
        self.read_json(USER_KEY)
    }

    pub fn set_access(&self, token: Option<&str>) -> Result<(), StorageError> {
        self.write_json(ACCESS_KEY, token)
    }

    pub fn set_refresh(&self, token: Option<&str>) -> Result<(), StorageError> {
        self.write_json(REFRESH_KEY, token)
    }

    pub fn set_user(&self, user: Option<&Value>) -> Result<(), StorageError> {
        self.write_json(USER_KEY, user)
    }

    /// Remove all three entries. Every removal is attempted even if an
    /// earlier one fails; the first failure is returned.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut first_err = None;
        for key in [ACCESS_KEY, REFRESH_KEY, USER_KEY] {
            if let Err(err) = self.storage.remove(key) {
                warn!(key, error = %err, "failed to remove session entry");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "session entry unreadable, treating as absent");
                return None;
            }
        };
        match serde_json::from_str::<Option<T>>(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "session entry malformed, treating as absent");
                None
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: Option<&T>,
    ) -> Result<(), StorageError> {
        match value {
            Some(value) => {
                let raw = serde_json::to_string(value).map_err(|e| StorageError::Encode {
                    key: key.to_string(),
                    message: e.to_string(),
                })?;
                debug!(key, "writing session entry");
                self.storage.write(key, &raw)
            }
            None => {
                debug!(key, "removing session entry");
                self.storage.remove(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_empty_store_reads_none() {
        let store = SessionStore::in_memory();
        assert!(store.get().is_empty());
        assert!(store.user().is_none());
    }

    #[test]
    fn test_set_and_get_tokens() {
        let store = SessionStore::in_memory();
        store.set_access(Some("a1")).unwrap();
        store.set_refresh(Some("r1")).unwrap();

        let pair = store.get();
        assert_eq!(pair.access.as_deref(), Some("a1"));
        assert_eq!(pair.refresh.as_deref(), Some("r1"));
    }

    #[test]
    fn test_setting_none_removes_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        store.set_access(Some("a1")).unwrap();
        store.set_access(None).unwrap();

        assert_eq!(storage.read(ACCESS_KEY).unwrap(), None);
        assert!(store.access().is_none());
    }

    #[test]
    fn test_values_are_json_encoded() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        store.set_access(Some("a1")).unwrap();
        assert_eq!(storage.read(ACCESS_KEY).unwrap().as_deref(), Some("\"a1\""));
    }

    #[test]
    fn test_malformed_entry_reads_none() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write(ACCESS_KEY, "{not json").unwrap();
        storage.write(REFRESH_KEY, "42").unwrap();
        storage.write(USER_KEY, "null").unwrap();

        let store = SessionStore::new(storage);
        assert!(store.get().is_empty());
        assert!(store.user().is_none());
    }

    #[test]
    fn test_clear_removes_everything() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        store.set_access(Some("a1")).unwrap();
        store.set_refresh(Some("r1")).unwrap();
        store.set_user(Some(&json!({"email": "jane@example.com"}))).unwrap();

        store.clear().unwrap();

        assert!(store.get().is_empty());
        assert!(store.user().is_none());
        for key in [ACCESS_KEY, REFRESH_KEY, USER_KEY] {
            assert_eq!(storage.read(key).unwrap(), None);
        }
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let pair = TokenPair {
            access: Some("secret-access".into()),
            refresh: None,
        };
        let printed = format!("{:?}", pair);
        assert!(!printed.contains("secret-access"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_file_storage_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(Arc::new(FileStorage::new(dir.path())));
        store.set_access(Some("a1")).unwrap();
        store.set_user(Some(&json!({"id": 3}))).unwrap();

        let reopened = SessionStore::new(Arc::new(FileStorage::new(dir.path())));
        assert_eq!(reopened.access().as_deref(), Some("a1"));
        assert_eq!(reopened.user(), Some(json!({"id": 3})));
    }

    #[test]
    fn test_file_storage_missing_and_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));
        assert_eq!(storage.read(ACCESS_KEY).unwrap(), None);
        storage.remove(ACCESS_KEY).unwrap();

        storage.write(REFRESH_KEY, "\"r1").unwrap();
        let store = SessionStore::new(Arc::new(storage));
        assert!(store.refresh().is_none());
    }

    #[test]
    fn test_file_storage_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.write(ACCESS_KEY, "\"a1\"").unwrap();
        assert!(dir.path().join("access.json").exists());

        storage.remove(ACCESS_KEY).unwrap();
        assert!(!dir.path().join("access.json").exists());
    }

    #[test]
    fn test_file_storage_concurrent_writers_of_one_key() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for round in 0..25 {
                        storage
                            .write(ACCESS_KEY, &format!("\"t{}-{}\"", i, round))
                            .expect("every writer should land");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let raw = storage.read(ACCESS_KEY).unwrap().unwrap();
        assert!(raw.starts_with("\"t"));
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
