//! In-memory cache store.
//!
//! Entries are evicted least-recently-used once `max_entries` is exceeded.
//! Nothing is written to disk, so closing the store discards its contents.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::storage::traits::{lock_err, KeyedStore, StorageError};

/// Configuration for cache-flavored stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries kept before the least recently used one is evicted.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

impl CacheConfig {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_entries == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "cache max_entries must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Vec<u8>,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// tick -> key, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn evict_to(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

/// Size-bounded, lossy, in-memory [`KeyedStore`].
#[derive(Debug)]
pub struct CacheStore {
    name: String,
    config: CacheConfig,
    state: Mutex<CacheState>,
    closed: AtomicBool,
}

impl CacheStore {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CacheState::default()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state.lock().map_err(|_| lock_err("cache state"))?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::StoreClosed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl KeyedStore for CacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.ensure_open()?;
        let mut state = self.state.lock().map_err(|_| lock_err("cache state"))?;
        if !state.entries.contains_key(key) {
            return Ok(None);
        }
        state.touch(key);
        Ok(state.entries.get(key).map(|e| e.value.clone()))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut state = self.state.lock().map_err(|_| lock_err("cache state"))?;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.value = value;
        } else {
            // Tick 0 is never in `recency`; `touch` assigns the real one.
            state.entries.insert(key.to_string(), CacheEntry { value, tick: 0 });
        }
        state.touch(key);
        let evicted = state.evict_to(self.config.max_entries);
        if evicted > 0 {
            tracing::debug!(store = %self.name, evicted, "cache eviction");
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_open()?;
        let mut state = self.state.lock().map_err(|_| lock_err("cache state"))?;
        match state.entries.remove(key) {
            Some(entry) => {
                state.recency.remove(&entry.tick);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.lock().map_err(|_| lock_err("cache state"))?;
        *state = CacheState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_entries: usize) -> CacheStore {
        CacheStore::new("test", CacheConfig { max_entries })
    }

    #[test]
    fn test_put_get_remove() {
        let s = store(4);
        s.put("a", vec![1]).unwrap();
        assert_eq!(s.get("a").unwrap(), Some(vec![1]));
        s.put("a", vec![2]).unwrap();
        assert_eq!(s.get("a").unwrap(), Some(vec![2]));
        assert_eq!(s.len().unwrap(), 1);
        assert!(s.remove("a").unwrap());
        assert!(!s.remove("a").unwrap());
        assert!(s.get("a").unwrap().is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let s = store(2);
        s.put("a", vec![1]).unwrap();
        s.put("b", vec![2]).unwrap();
        // Reading "a" makes "b" the eviction candidate.
        s.get("a").unwrap();
        s.put("c", vec![3]).unwrap();

        assert_eq!(s.len().unwrap(), 2);
        assert!(s.get("a").unwrap().is_some());
        assert!(s.get("b").unwrap().is_none());
        assert!(s.get("c").unwrap().is_some());
    }

    #[test]
    fn test_shutdown_is_idempotent_and_closes() {
        let s = store(2);
        s.put("a", vec![1]).unwrap();
        s.shutdown().unwrap();
        s.shutdown().unwrap();
        assert!(s.is_closed());
        assert!(matches!(s.get("a"), Err(StorageError::StoreClosed { .. })));
        assert!(matches!(s.put("a", vec![]), Err(StorageError::StoreClosed { .. })));
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig { max_entries: 0 }.validate().is_err());
        assert!(CacheConfig::default().validate().is_ok());
    }
}
