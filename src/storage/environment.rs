//! Shared store environments and consumer handles.
//!
//! A [`StoreEnvironment`] is constructed once per store flavor and cloned
//! into every worker that needs it. Stores are opened lazily by name; each
//! [`StoreHandle`] counts as one consumer. The environment closes when the
//! last consumer shuts its handle down, or when [`StoreEnvironment::shutdown`]
//! is called directly (for example from a process-exit path). A closed
//! environment never reopens.

use std::collections::HashMap;
#[cfg(feature = "persistent")]
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::EpisodicResult;
use crate::storage::memory::{CacheConfig, CacheStore};
#[cfg(feature = "persistent")]
use crate::storage::persistent::{DurableConfig, DurableStore};
use crate::storage::traits::{lock_err, KeyedStore, StorageError, StoreFlavor};

#[derive(Debug)]
enum Backend {
    Cache(CacheConfig),
    #[cfg(feature = "persistent")]
    Durable { root: PathBuf, config: DurableConfig },
}

enum EnvState {
    Unopened,
    Open {
        stores: HashMap<String, Arc<dyn KeyedStore>>,
        consumers: usize,
    },
    Shutdown,
}

struct EnvInner {
    backend: Backend,
    state: Mutex<EnvState>,
}

/// Process-wide owner of all stores of one flavor.
#[derive(Clone)]
pub struct StoreEnvironment {
    inner: Arc<EnvInner>,
}

impl std::fmt::Debug for StoreEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEnvironment")
            .field("flavor", &self.flavor())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl StoreEnvironment {
    /// Creates a cache-flavored environment.
    pub fn cache(config: CacheConfig) -> EpisodicResult<Self> {
        Ok(Self::with_backend(Backend::Cache(config.validate()?)))
    }

    /// Creates a durable environment rooted at `root`. Nothing is touched on
    /// disk until the first store is opened.
    #[cfg(feature = "persistent")]
    pub fn durable(root: impl Into<PathBuf>, config: DurableConfig) -> EpisodicResult<Self> {
        Ok(Self::with_backend(Backend::Durable {
            root: root.into(),
            config: config.validate()?,
        }))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                backend,
                state: Mutex::new(EnvState::Unopened),
            }),
        }
    }

    #[must_use]
    pub fn flavor(&self) -> StoreFlavor {
        match self.inner.backend {
            Backend::Cache(_) => StoreFlavor::Cache,
            #[cfg(feature = "persistent")]
            Backend::Durable { .. } => StoreFlavor::Durable,
        }
    }

    /// Returns a handle on store `name`, opening the environment and the
    /// store on first use. Opening the same name twice shares one store.
    pub fn open_store(&self, name: &str) -> Result<StoreHandle, StorageError> {
        validate_store_name(name)?;
        let mut state = self.inner.state.lock().map_err(|_| lock_err("store environment"))?;
        if matches!(*state, EnvState::Unopened) {
            tracing::info!(flavor = self.flavor().name(), "store environment opened");
            *state = EnvState::Open {
                stores: HashMap::new(),
                consumers: 0,
            };
        }
        let EnvState::Open { stores, consumers } = &mut *state else {
            return Err(StorageError::EnvironmentClosed);
        };

        let store = match stores.get(name) {
            Some(store) => Arc::clone(store),
            None => {
                let store = self.open_backend(name)?;
                stores.insert(name.to_string(), Arc::clone(&store));
                store
            }
        };
        *consumers += 1;

        Ok(StoreHandle {
            name: name.to_string(),
            store,
            env: self.clone(),
            released: AtomicBool::new(false),
        })
    }

    fn open_backend(&self, name: &str) -> Result<Arc<dyn KeyedStore>, StorageError> {
        match &self.inner.backend {
            Backend::Cache(config) => Ok(Arc::new(CacheStore::new(name, *config))),
            #[cfg(feature = "persistent")]
            Backend::Durable { root, config } => Ok(Arc::new(DurableStore::open(root, name, *config)?)),
        }
    }

    /// Number of handles not yet shut down.
    pub fn consumers(&self) -> Result<usize, StorageError> {
        let state = self.inner.state.lock().map_err(|_| lock_err("store environment"))?;
        Ok(match &*state {
            EnvState::Open { consumers, .. } => *consumers,
            EnvState::Unopened | EnvState::Shutdown => 0,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .state
            .lock()
            .map_or(true, |state| matches!(*state, EnvState::Shutdown))
    }

    /// Closes every store regardless of outstanding handles. Idempotent.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock().map_err(|_| lock_err("store environment"))?;
        Self::close(&mut state, self.flavor())
    }

    fn release(&self) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock().map_err(|_| lock_err("store environment"))?;
        if let EnvState::Open { consumers, .. } = &mut *state {
            *consumers = consumers.saturating_sub(1);
            if *consumers == 0 {
                return Self::close(&mut state, self.flavor());
            }
        }
        Ok(())
    }

    fn close(state: &mut EnvState, flavor: StoreFlavor) -> Result<(), StorageError> {
        let previous = std::mem::replace(state, EnvState::Shutdown);
        let EnvState::Open { stores, .. } = previous else {
            return Ok(());
        };
        // Every store is shut down even if one fails; the first error is returned.
        let mut first_err = None;
        for (name, store) in &stores {
            if let Err(e) = store.shutdown() {
                tracing::error!(flavor = flavor.name(), store = %name, error = %e, "store shutdown failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        tracing::info!(flavor = flavor.name(), stores = stores.len(), "store environment shut down");
        first_err.map_or(Ok(()), Err)
    }
}

fn validate_store_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.contains("..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidStoreName {
            name: name.to_string(),
        })
    }
}

/// One consumer's access to a named store.
///
/// Operations fail with [`StorageError::StoreClosed`] after this handle is
/// shut down and with [`StorageError::EnvironmentClosed`] after the
/// environment is.
pub struct StoreHandle {
    name: String,
    store: Arc<dyn KeyedStore>,
    env: StoreEnvironment,
    released: AtomicBool,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StoreHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn environment(&self) -> &StoreEnvironment {
        &self.env
    }

    fn ensure_usable(&self) -> Result<&dyn KeyedStore, StorageError> {
        if self.released.load(Ordering::Acquire) {
            return Err(StorageError::StoreClosed {
                name: self.name.clone(),
            });
        }
        if self.env.is_closed() {
            return Err(StorageError::EnvironmentClosed);
        }
        Ok(self.store.as_ref())
    }
}

impl KeyedStore for StoreHandle {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.ensure_usable()?.get(key)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_usable()?.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_usable()?.remove(key)
    }

    fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire) || self.env.is_closed()
    }

    /// Releases this consumer; the last release closes the environment.
    fn shutdown(&self) -> Result<(), StorageError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.env.release()
    }
}
