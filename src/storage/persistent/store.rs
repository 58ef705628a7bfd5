use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use super::file_lock::FileLock;
use super::wal::{LogRecord, WriteAheadLog};
use super::DurableConfig;
use crate::storage::traits::{lock_err, KeyedStore, StorageError};

/// Durable [`KeyedStore`] backed by a write-ahead log.
///
/// Files under the store directory:
/// - `<name>.wal` holds the log,
/// - `<name>.lock` is held exclusively until the store is shut down.
///
/// The full key space is kept in memory; the log is compacted to one entry
/// per live key once it grows past `max_log_size`.
#[derive(Debug)]
pub struct DurableStore {
    name: String,
    config: DurableConfig,
    log: WriteAheadLog,
    entries: RwLock<HashMap<String, Vec<u8>>>,
    closed: AtomicBool,
    lock: Mutex<Option<FileLock>>,
}

impl DurableStore {
    /// Opens the store `name` inside `dir`, replaying its log.
    pub fn open(dir: &Path, name: &str, config: DurableConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let lock = FileLock::acquire(&dir.join(format!("{name}.lock")))?;
        let (log, replayed) = WriteAheadLog::open(&dir.join(format!("{name}.wal")), config.sync_on_write)?;

        let mut entries = HashMap::new();
        for entry in replayed {
            match entry.record {
                LogRecord::Put { key, value } => {
                    entries.insert(key, value);
                }
                LogRecord::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        tracing::debug!(store = %name, keys = entries.len(), "durable store replayed");

        Ok(Self {
            name: name.to_string(),
            config,
            log,
            entries: RwLock::new(entries),
            closed: AtomicBool::new(false),
            lock: Mutex::new(Some(lock)),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rewrites the log to one entry per live key.
    pub fn compact(&self) -> Result<(), StorageError> {
        let entries = self.entries.write().map_err(|_| lock_err("durable entries"))?;
        self.ensure_open()?;
        self.compact_locked(&entries)
    }

    fn compact_locked(&self, entries: &HashMap<String, Vec<u8>>) -> Result<(), StorageError> {
        let mut live: Vec<(&String, &Vec<u8>)> = entries.iter().collect();
        live.sort_by_key(|(key, _)| *key);
        self.log.compact(live.into_iter().map(|(key, value)| LogRecord::Put {
            key: key.clone(),
            value: value.clone(),
        }))?;
        tracing::debug!(store = %self.name, keys = entries.len(), "log compacted");
        Ok(())
    }

    /// Log and apply one mutation while holding the entries lock, so the
    /// log order matches the in-memory order.
    fn apply(&self, record: LogRecord) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("durable entries"))?;
        self.ensure_open()?;
        self.log.append(record.clone())?;
        let existed = match record {
            LogRecord::Put { key, value } => entries.insert(key, value).is_some(),
            LogRecord::Remove { key } => entries.remove(&key).is_some(),
        };
        if self.log.size_bytes()? > self.config.max_log_size {
            self.compact_locked(&entries)?;
        }
        Ok(existed)
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

impl KeyedStore for DurableStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(|_| lock_err("durable entries"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.apply(LogRecord::Put {
            key: key.to_string(),
            value,
        })
        .map(|_| ())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let present = {
            self.ensure_open()?;
            let entries = self.entries.read().map_err(|_| lock_err("durable entries"))?;
            entries.contains_key(key)
        };
        if !present {
            return Ok(false);
        }
        self.apply(LogRecord::Remove { key: key.to_string() })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the store and releases its file lock. Idempotent.
    fn shutdown(&self) -> Result<(), StorageError> {
        // No mutation may reach the log once another owner can take the lock.
        let _entries = self.entries.write().map_err(|_| lock_err("durable entries"))?;
        self.closed.store(true, Ordering::Release);
        let released = self.lock.lock().map_err(|_| lock_err("durable file lock"))?.take();
        if let Some(lock) = released {
            tracing::debug!(store = %self.name, lock = %lock.path().display(), "file lock released");
        }
        Ok(())
    }
}
