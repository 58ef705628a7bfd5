//! Durable keyed store backend.
//!
//! Each store is a write-ahead log of key/value mutations with:
//! - CRC32 checksums for corruption detection
//! - exclusive file locking for single-process access
//! - replay on open and compaction once the log grows past a limit
//!
//! ```text
//! <dir>/
//! ├── <name>.wal    codec-framed Put/Remove records
//! └── <name>.lock   flock/LockFileEx target
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use store::DurableStore;
pub use wal::{LogRecord, WalEntry, WriteAheadLog};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Configuration for durable stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableConfig {
    /// Log size in bytes that triggers compaction.
    pub max_log_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            max_log_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl DurableConfig {
    /// Smaller limits would compact on nearly every write.
    pub const MIN_LOG_SIZE: u64 = 4 * 1024;

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_log_size < Self::MIN_LOG_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_log_size must be at least {} bytes (got {})",
                    Self::MIN_LOG_SIZE,
                    self.max_log_size
                ),
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_tiny_log() {
        let cfg = DurableConfig {
            max_log_size: 16,
            ..DurableConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_log_size"));
        assert!(DurableConfig::default().validate().is_ok());
    }
}
