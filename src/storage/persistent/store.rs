//! Durable resolution store.
//!
//! State lives in an [`InMemoryStore`]; every committed transaction is
//! journaled to the write-ahead log before it becomes visible, and the log
//! is replayed on open. Claims are run-scoped and are not journaled: after a
//! restart every unlinked observation is claimable again.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::entity::EntityId;
use crate::ingest::NewEvent;
use crate::observation::{EventId, ObservationId};
use crate::storage::memory::{InMemoryStore, MemorySnapshot, StoreCounts};
use crate::storage::traits::{
    ClaimRequest, ResolutionStore, RunId, StorageError, Transaction,
};

use super::dir_lock::DirLock;
use super::wal::WriteAheadLog;
use super::PersistentConfig;

const WAL_FILE: &str = "platon.wal";

/// WAL-backed [`ResolutionStore`] holding an exclusive lock on its directory.
#[derive(Debug)]
pub struct PersistentStore {
    dir: PathBuf,
    inner: InMemoryStore,
    wal: Arc<WriteAheadLog>,
    _lock: DirLock,
}

impl PersistentStore {
    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    /// - `Unavailable` if the directory cannot be created, is locked by
    ///   another process, or the log cannot be opened
    /// - `BackendError` if the log holds writes that do not replay cleanly
    pub fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::Unavailable(format!(
                "failed to create data directory {}: {e}",
                dir.display()
            ))
        })?;

        let lock = DirLock::acquire(dir).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock => StorageError::Unavailable(format!("data directory {e}")),
            _ => StorageError::Unavailable(format!("failed to acquire lock: {e}")),
        })?;

        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| StorageError::Unavailable(format!("failed to open WAL: {e}")))?;
        let wal = Arc::new(wal);

        let inner = InMemoryStore::with_journal(Box::new(Arc::clone(&wal)));
        for entry in &entries {
            inner.replay(&entry.mutations).map_err(|e| {
                StorageError::BackendError(format!(
                    "WAL replay failed at sequence {}: {e}",
                    entry.sequence
                ))
            })?;
        }

        let counts = inner.counts()?;
        info!(
            dir = %dir.display(),
            wal_entries = entries.len(),
            observations = counts.observations,
            entities = counts.entities,
            "store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            inner,
            wal,
            _lock: lock,
        })
    }

    /// Directory holding the store's files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sequence number of the last committed transaction.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn wal_sequence(&self) -> Result<u64, StorageError> {
        self.wal.current_sequence()
    }

    /// See [`InMemoryStore::ingest`].
    ///
    /// # Errors
    /// `Unavailable` if the write cannot be made durable.
    pub fn ingest(&self, event: NewEvent) -> Result<(EventId, Vec<ObservationId>), StorageError> {
        self.inner.ingest(event)
    }

    /// See [`InMemoryStore::snapshot`].
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn snapshot(&self) -> Result<MemorySnapshot<'_>, StorageError> {
        self.inner.snapshot()
    }

    /// See [`InMemoryStore::counts`].
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn counts(&self) -> Result<StoreCounts, StorageError> {
        self.inner.counts()
    }
}

impl ResolutionStore for PersistentStore {
    fn claim_unresolved(&self, request: &ClaimRequest) -> Result<Vec<ObservationId>, StorageError> {
        self.inner.claim_unresolved(request)
    }

    fn release_claim(
        &self,
        run_id: RunId,
        observation_id: ObservationId,
    ) -> Result<(), StorageError> {
        self.inner.release_claim(run_id, observation_id)
    }

    fn pending_synthesis(&self) -> Result<Vec<EntityId>, StorageError> {
        self.inner.pending_synthesis()
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        self.inner.begin()
    }
}
