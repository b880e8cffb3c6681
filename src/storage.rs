//! Key-value persistence for history and configuration.
//!
//! [`KeyValueStore`] is the raw capability: string keys to string values.
//! [`MemoryStore`] backs tests and ephemeral sessions, [`FileStore`] keeps
//! everything in one JSON file on disk. [`Storage`] layers the envelope on
//! top: a key prefix, JSON values, a write timestamp, an optional expiry and
//! a format version. Expired values are dropped on read and by
//! [`Storage::cleanup`].

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Version written into every envelope.
pub const STORAGE_VERSION: &str = "1.0.0";

/// Errors raised by a [`KeyValueStore`] or the [`Storage`] envelope.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored value is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Raw string-to-string persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock().map_err(|_| StoreError::Poisoned)
}

/// Volatile store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.map)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        lock(&self.map)?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.map)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.map)?.keys().cloned().collect())
    }
}

/// All keys in a single pretty-printed JSON object on disk.
///
/// Every write replaces the file atomically (temp file in the same directory,
/// then rename) so a crash never leaves a half-written store behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        debug!("Opened file store {} ({} keys)", path.display(), map.len());
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |e: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source: e,
        };
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
        let json = serde_json::to_vec_pretty(map)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.map)?.get(key).cloned())
    }

    // Writes go to disk first; memory only changes once the file is replaced.
    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut map = lock(&self.map)?;
        let mut next = map.clone();
        next.insert(key.to_string(), value);
        self.flush(&next)?;
        *map = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = lock(&self.map)?;
        if !map.contains_key(key) {
            return Ok(());
        }
        let mut next = map.clone();
        next.remove(key);
        self.flush(&next)?;
        *map = next;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.map)?.keys().cloned().collect())
    }
}

/// Stored shape of every value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    value: T,
    /// Write time, epoch milliseconds.
    timestamp: i64,
    /// Expiry, epoch milliseconds.
    expires: Option<i64>,
    version: String,
}

impl<T> Envelope<T> {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires.is_some_and(|exp| now_ms > exp)
    }
}

/// Item count and byte size of everything under the storage prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub items: usize,
    pub bytes: usize,
}

/// Prefixed, JSON-enveloped view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl Storage {
    pub fn new(backend: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// In-memory storage with the given prefix.
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), prefix)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read `key`, dropping it if it has expired.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let full_key = self.full_key(key);
        let Some(raw) = self.backend.get(&full_key)? else {
            return Ok(None);
        };
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(&raw)?;
        if envelope.is_expired(Utc::now().timestamp_millis()) {
            debug!("Stored key '{}' expired, removing", full_key);
            self.backend.remove(&full_key)?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(envelope.value)?))
    }

    /// Write `value` under `key`, expiring after `ttl` when given.
    pub fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        let envelope = Envelope {
            value,
            timestamp: now,
            expires: ttl.map(|d| now.saturating_add(d.as_millis() as i64)),
            version: STORAGE_VERSION.to_string(),
        };
        self.backend
            .set(&self.full_key(key), serde_json::to_string(&envelope)?)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(&self.full_key(key))
    }

    fn own_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&self.prefix))
            .collect())
    }

    /// Remove every expired value under the prefix. Returns how many went.
    pub fn cleanup(&self) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut removed = 0;
        for key in self.own_keys()? {
            let Some(raw) = self.backend.get(&key)? else {
                continue;
            };
            match serde_json::from_str::<Envelope<serde_json::Value>>(&raw) {
                Ok(env) if env.is_expired(now) => {
                    self.backend.remove(&key)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable stored key '{}': {}", key, e),
            }
        }
        Ok(removed)
    }

    pub fn usage(&self) -> Result<StorageUsage, StoreError> {
        let mut usage = StorageUsage { items: 0, bytes: 0 };
        for key in self.own_keys()? {
            if let Some(raw) = self.backend.get(&key)? {
                usage.items += 1;
                usage.bytes += raw.len();
            }
        }
        Ok(usage)
    }

    /// Remove every value under the prefix. Returns how many went.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let keys = self.own_keys()?;
        for key in &keys {
            self.backend.remove(key)?;
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_envelope() {
        let storage = Storage::in_memory("t_");
        storage.set_json("k", &vec![1, 2, 3], None).unwrap();
        let v: Option<Vec<i32>> = storage.get_json("k").unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));
    }

    #[test]
    fn expired_value_is_removed_on_read() {
        let backend = Arc::new(MemoryStore::new());
        let storage = Storage::new(backend.clone(), "t_");
        let past = Utc::now().timestamp_millis() - 1_000;
        let raw = format!(
            r#"{{"value":"old","timestamp":{past},"expires":{past},"version":"1.0.0"}}"#
        );
        backend.set("t_k", raw).unwrap();

        let v: Option<String> = storage.get_json("k").unwrap();
        assert!(v.is_none());
        assert!(backend.get("t_k").unwrap().is_none());
    }

    #[test]
    fn cleanup_only_touches_expired_prefixed_keys() {
        let backend = Arc::new(MemoryStore::new());
        let storage = Storage::new(backend.clone(), "t_");
        let past = Utc::now().timestamp_millis() - 1_000;
        backend
            .set(
                "t_old",
                format!(r#"{{"value":1,"timestamp":{past},"expires":{past},"version":"1.0.0"}}"#),
            )
            .unwrap();
        storage
            .set_json("fresh", &2, Some(Duration::from_secs(3600)))
            .unwrap();
        backend.set("other_old", "x".into()).unwrap();

        assert_eq!(storage.cleanup().unwrap(), 1);
        assert_eq!(storage.usage().unwrap().items, 1);
        assert!(backend.get("other_old").unwrap().is_some());
    }

    #[test]
    fn clear_removes_only_prefixed_keys() {
        let backend = Arc::new(MemoryStore::new());
        let storage = Storage::new(backend.clone(), "t_");
        storage.set_json("a", &1, None).unwrap();
        storage.set_json("b", &2, None).unwrap();
        backend.set("keep", "x".into()).unwrap();

        assert_eq!(storage.clear().unwrap(), 2);
        assert_eq!(backend.keys().unwrap(), vec!["keep".to_string()]);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set("a", "1".into()).unwrap();
            store.set("b", "2".into()).unwrap();
            store.remove("a").unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
    }
    #[test]
    fn failed_file_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be.
        std::fs::write(dir.path().join("blocker"), b"").unwrap();
        let store = FileStore::open(dir.path().join("blocker").join("store.json")).unwrap();

        assert!(store.set("a", "1".into()).is_err());
        assert_eq!(store.get("a").unwrap(), None);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn failed_file_remove_keeps_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let store = FileStore::open(sub.join("store.json")).unwrap();
        store.set("a", "1".into()).unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"").unwrap();

        assert!(store.remove("a").is_err());
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        // Removing an absent key never touches the disk.
        store.remove("missing").unwrap();
    }
}
