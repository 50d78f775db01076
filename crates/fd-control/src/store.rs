//! Durable key-value persistence
//!
//! Records are grouped into namespaces. [`JsonFileStore`] keeps one pretty
//! printed JSON object per namespace under the data directory and replaces it
//! atomically on every write.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use fd_core::error::StoreError;

pub const TARGETS: &str = "targets";
pub const ALERT_DESTINATIONS: &str = "alert_destinations";
pub const ALERT_RULES: &str = "alert_rules";

/// Namespaced JSON key-value store
pub trait KvStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError>;

    fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Returns whether the key existed
    fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError>;

    /// All records in a namespace, ordered by key
    fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Decode every record in a namespace, skipping ones that no longer parse
pub fn load_all<T: DeserializeOwned>(
    store: &dyn KvStore,
    namespace: &str,
) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();
    for (key, value) in store.list(namespace)? {
        match serde_json::from_value(value) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(namespace, key, "Skipping unreadable record: {}", e),
        }
    }
    Ok(records)
}

/// Encode and store one record
pub fn save<T: Serialize>(
    store: &dyn KvStore,
    namespace: &str,
    key: &str,
    record: &T,
) -> Result<(), StoreError> {
    store.put(namespace, key, serde_json::to_value(record)?)
}

type Namespaces = HashMap<String, BTreeMap<String, Value>>;

/// Volatile store
#[derive(Default)]
pub struct MemoryStore {
    namespaces: Mutex<Namespaces>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.namespaces
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .get_mut(namespace)
            .map_or(false, |ns| ns.remove(key).is_some()))
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// One JSON file per namespace, cached in memory after first read
pub struct JsonFileStore {
    dir: PathBuf,
    cache: Mutex<Namespaces>,
}

impl JsonFileStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn file(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    /// Run `f` against a namespace, loading it from disk on first use
    fn with_namespace<R>(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> R,
    ) -> Result<R, StoreError> {
        let mut cache = self.cache.lock();
        if !cache.contains_key(namespace) {
            let loaded = self.read_file(namespace)?;
            cache.insert(namespace.to_string(), loaded);
        }
        let records = cache.entry(namespace.to_string()).or_default();
        Ok(f(records))
    }

    fn read_file(&self, namespace: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        let path = self.file(namespace);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write via a temp file and rename so readers never see a partial file
    fn write_file(&self, namespace: &str, records: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let path = self.file(namespace);
        let tmp = self.dir.join(format!(".{}.json.tmp", namespace));
        let json = serde_json::to_string_pretty(records)?;
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    fn mutate(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> bool,
    ) -> Result<bool, StoreError> {
        let mut cache = self.cache.lock();
        if !cache.contains_key(namespace) {
            let loaded = self.read_file(namespace)?;
            cache.insert(namespace.to_string(), loaded);
        }
        let records = cache.entry(namespace.to_string()).or_default();
        let mut updated = records.clone();
        let changed = f(&mut updated);
        if changed {
            // Disk first; the cache only moves once the write landed
            self.write_file(namespace, &updated)?;
            *records = updated;
        }
        Ok(changed)
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.with_namespace(namespace, |records| records.get(key).cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.mutate(namespace, |records| {
            records.insert(key.to_string(), value);
            true
        })?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        self.mutate(namespace, |records| records.remove(key).is_some())
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, StoreError> {
        self.with_namespace(namespace, |records| {
            records
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }
}
