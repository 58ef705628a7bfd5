//! Keyed storage for derivation results.

mod environment;
mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

pub use environment::{StoreEnvironment, StoreHandle};
pub use memory::{CacheConfig, CacheStore};
#[cfg(feature = "persistent")]
pub use persistent::{DurableConfig, DurableStore};
pub use traits::{KeyedStore, KeyedStoreExt, StorageError, StoreFlavor};
