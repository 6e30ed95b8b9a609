//! Persistent storage backend.
//!
//! Durable, crash-safe storage built from:
//! - an in-memory store holding the working set
//! - a write-ahead log with one CRC-checked record per committed transaction
//! - an exclusive file lock so only one process opens a data directory
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              PersistentStore              │
//! ├───────────────────────────────────────────┤
//! │  InMemoryStore ──commit──▶ WriteAheadLog  │
//! │        ▲                        │         │
//! │        └────────replay──────────┘         │
//! │                                           │
//! │      DirLock (.lock, holder pid)          │
//! └───────────────────────────────────────────┘
//! ```

mod codec;
mod dir_lock;
mod store;
mod wal;

pub use dir_lock::DirLock;
pub use store::PersistentStore;
pub use wal::{WalEntry, WriteAheadLog};

use std::path::Path;

use crate::storage::traits::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every commit (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Open or create a persistent store at the given directory.
///
/// # Errors
/// See [`PersistentStore::open`].
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use platon::storage::persistent::open_store;
///
/// let store = Arc::new(open_store("./data", None)?);
/// let report = Resolver::new(store, ResolverConfig::default())?.run()?;
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentStore, StorageError> {
    PersistentStore::open(path.as_ref(), &config.unwrap_or_default())
}
