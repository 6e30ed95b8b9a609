//! Single-process guard for a data directory.
//!
//! The OS lock on `<dir>/.lock` is what keeps a second process out. The file
//! also carries the holder's process id so a refused open can say who holds
//! the directory. The lock goes away with the handle, including when the
//! process dies.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

const LOCK_FILE: &str = ".lock";

/// Exclusive lock on a data directory, released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Locks `dir` and records this process as the holder.
    ///
    /// # Errors
    /// `ErrorKind::WouldBlock` when another process holds the directory; the
    /// message names its process id when it can be read. Other I/O errors
    /// pass through.
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(err) = lock_exclusive(&file) {
            if err.kind() != ErrorKind::WouldBlock {
                return Err(err);
            }
            let message = match read_holder(&mut file) {
                Some(pid) => format!("{} is locked by process {pid}", dir.display()),
                None => format!("{} is locked by another process", dir.display()),
            };
            return Err(IoError::new(ErrorKind::WouldBlock, message));
        }

        let pid = std::process::id();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{pid}")?;
        file.sync_data()?;
        debug!(path = %path.display(), pid, "data directory locked");

        Ok(Self { file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process id recorded in the lock file.
    #[must_use]
    pub fn holder(&mut self) -> Option<u32> {
        read_holder(&mut self.file)
    }
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> IoResult<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(());
    }
    let err = IoError::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Err(IoError::from(ErrorKind::WouldBlock)),
        _ => Err(err),
    }
}

/// Windows locks are mandatory, so the locked byte sits far past the pid
/// text to keep it readable by the process being refused.
#[cfg(windows)]
fn lock_exclusive(file: &File) -> IoResult<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // SAFETY: OVERLAPPED is plain data and the handle belongs to `file`,
    // which outlives the call.
    let locked = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        overlapped.Anonymous.Anonymous.Offset = u32::MAX;
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if locked != 0 {
        return Ok(());
    }
    let err = IoError::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == ERROR_LOCK_VIOLATION as i32 => {
            Err(IoError::from(ErrorKind::WouldBlock))
        }
        _ => Err(err),
    }
}

#[cfg(not(any(unix, windows)))]
fn lock_exclusive(_file: &File) -> IoResult<()> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "data directory locking is not available on this platform",
    ))
}
