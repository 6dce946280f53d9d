//! Expiring key/value store for short-lived flow state
//!
//! Device authorization requests and revoked-token markers live here. Entries
//! carry a TTL and disappear on their own; a missing entry is how callers
//! observe expiry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A string key/value store whose entries expire.
pub trait ExpiringStore: Send + Sync {
    /// Get a live value.
    fn get(&self, key: &str) -> Option<String>;

    /// Set a value for `ttl`. A zero TTL removes the key.
    fn set(&self, key: &str, value: String, ttl: Duration);

    /// Remove a key.
    fn delete(&self, key: &str);
}

/// Store `value` as JSON.
pub fn set_json<T: Serialize>(
    store: &dyn ExpiringStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), KvError> {
    let data = serde_json::to_string(value)?;
    store.set(key, data, ttl);
    Ok(())
}

/// Load a JSON value. Returns `None` when the key is absent or expired.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn ExpiringStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    match store.get(key) {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`ExpiringStore`].
///
/// Expired entries are skipped on read and swept on write.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExpiringStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| e.expires_at > now);

        if ttl.is_zero() {
            entries.remove(key);
            return;
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        status: String,
        count: u32,
    }

    #[test]
    fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string(), Duration::from_secs(60));
        assert_eq!(store.get("a").as_deref(), Some("1"));
        assert_eq!(store.len(), 1);

        store.delete("a");
        assert_eq!(store.get("a"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_ttl_removes() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string(), Duration::from_secs(60));
        store.set("a", "2".to_string(), Duration::ZERO);
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_entries_expire() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("a"), None);

        // The next write sweeps it out
        store.set("b", "2".to_string(), Duration::from_secs(60));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        let record = Record {
            status: "pending".to_string(),
            count: 3,
        };
        set_json(&store, "r", &record, Duration::from_secs(60)).unwrap();

        let loaded: Option<Record> = get_json(&store, "r").unwrap();
        assert_eq!(loaded, Some(record));

        let missing: Option<Record> = get_json(&store, "missing").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_json_helpers_bad_data() {
        let store = MemoryStore::new();
        store.set("r", "not json".to_string(), Duration::from_secs(60));
        let loaded: Result<Option<Record>, _> = get_json(&store, "r");
        assert!(loaded.is_err());
    }
}
