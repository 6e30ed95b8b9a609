//! Write-ahead log.
//!
//! Each committed transaction becomes one [`WalEntry`], so a transaction is
//! either fully in the log or not at all. On open, the log is scanned up to
//! the last intact record; anything after it is a torn write from a crash and
//! is cut off before new records are appended.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::storage::memory::Journal;
use crate::storage::mutation::Mutation;
use crate::storage::traits::StorageError;

use super::codec;

/// One committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
    /// When the transaction committed.
    pub timestamp: DateTime<Utc>,
    /// The transaction's writes, in application order.
    pub mutations: Vec<Mutation>,
}

#[derive(Debug)]
struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
    /// Set after a failed append; the tail may be torn, so no more records
    /// may follow it in this process.
    failed: bool,
}

/// Append-only log of committed transactions.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Opens or creates the log, returning it with every intact entry.
    ///
    /// # Errors
    /// Fails on I/O errors or if the file is not a platon log.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let (entries, valid_len) = if file_len < codec::HEADER_LEN {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (Vec::new(), codec::HEADER_LEN)
        } else {
            Self::scan(&file)?
        };

        if valid_len < file_len && file_len >= codec::HEADER_LEN {
            warn!(
                path = %path.display(),
                discarded_bytes = file_len - valid_len,
                "discarding torn WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        let sequence = entries.last().map_or(0, |entry: &WalEntry| entry.sequence);
        debug!(path = %path.display(), entries = entries.len(), sequence, "WAL opened");

        Ok((
            Self {
                path: path.to_path_buf(),
                writer: Mutex::new(WalWriter {
                    file: BufWriter::new(file),
                    sequence,
                    failed: false,
                }),
                sync_on_write,
            },
            entries,
        ))
    }

    /// Reads entries until the first damaged or incomplete record, returning
    /// them with the byte offset where the intact prefix ends.
    fn scan(file: &File) -> IoResult<(Vec<WalEntry>, u64)> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        codec::read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut valid_len = codec::HEADER_LEN;
        loop {
            match codec::decode::<WalEntry>(&mut reader) {
                Ok(entry) => {
                    entries.push(entry);
                    valid_len = reader.stream_position()?;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    warn!(offset = valid_len, error = %e, "corrupt WAL record");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((entries, valid_len))
    }

    /// Sequence number of the last written entry.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn current_sequence(&self) -> Result<u64, StorageError> {
        self.writer
            .lock()
            .map(|writer| writer.sequence)
            .map_err(|_| StorageError::BackendError("poisoned lock: wal".to_string()))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&self, writer: &mut WalWriter, encoded: &[u8]) -> IoResult<()> {
        writer.file.write_all(encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_data()?;
        }
        Ok(())
    }
}

impl Journal for WriteAheadLog {
    fn append(&self, writes: &[Mutation]) -> Result<(), StorageError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StorageError::BackendError("poisoned lock: wal".to_string()))?;
        if writer.failed {
            return Err(StorageError::Unavailable(
                "write-ahead log failed earlier; reopen the store".to_string(),
            ));
        }

        let entry = WalEntry {
            sequence: writer.sequence + 1,
            timestamp: Utc::now(),
            mutations: writes.to_vec(),
        };
        let encoded = codec::encode(&entry)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        if let Err(e) = self.write_record(&mut writer, &encoded) {
            writer.failed = true;
            error!(sequence = entry.sequence, error = %e, "WAL append failed");
            return Err(StorageError::Unavailable(format!("WAL append failed: {e}")));
        }
        writer.sequence = entry.sequence;
        Ok(())
    }
}
