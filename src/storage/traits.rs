//! Keyed store contract.
//!
//! Two flavors implement it:
//! - a cache store that may evict entries under memory pressure,
//! - a durable store that keeps entries until they are removed.
//!
//! Callers of a cache-flavored store must treat a miss as "not yet
//! computed", never as "definitely absent".

use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The shared store environment was shut down.
    #[error("Store environment has been shut down")]
    EnvironmentClosed,

    /// The store, or the handle used to reach it, was closed.
    #[error("Store '{name}' is closed")]
    StoreClosed { name: String },

    /// Store names become file names, so they are restricted.
    #[error("Invalid store name '{name}'")]
    InvalidStoreName { name: String },

    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk data failed its integrity check.
    #[error("Corrupted store data: {0}")]
    Corrupted(String),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process holds the store directory.
    #[error("Store directory {} is locked by another process", .path.display())]
    Locked { path: PathBuf },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// The flavor of a keyed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFlavor {
    /// In-memory, size-bounded, lossy.
    Cache,
    /// Persisted until explicitly removed.
    Durable,
}

impl StoreFlavor {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Durable => "durable",
        }
    }
}

/// A string-keyed byte store.
///
/// # Safety Considerations
/// - Implementations must be safe to share between worker threads
/// - Every operation on a closed store fails with [`StorageError::StoreClosed`]
pub trait KeyedStore: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove `key`. Returns true if a value was present.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Returns true once the store no longer accepts operations.
    fn is_closed(&self) -> bool;

    /// Close the store. Idempotent.
    fn shutdown(&self) -> Result<(), StorageError>;
}

/// JSON-encoded typed access on top of any [`KeyedStore`].
pub trait KeyedStoreExt: KeyedStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.get(key)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.put(key, bytes)
    }
}

impl<S: KeyedStore + ?Sized> KeyedStoreExt for S {}

/// Maps a poisoned lock to a backend error.
pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}
