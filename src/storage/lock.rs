//! Single-owner guard for a cache root
//!
//! The queue lock only serializes work inside one process, so at most one
//! process may own a cache root. The owner holds an advisory lock on
//! `<root>/.lock`; the OS releases it when the holder exits, crashed or not.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::debug;

use super::{Result, StorageError};

pub const LOCK_FILE: &str = ".lock";

/// Held for the lifetime of a process that owns the cache root
#[derive(Debug)]
pub struct CacheLock {
    // Closing the handle releases the lock
    _file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Take the lock without waiting; `StorageError::Locked` if another owner has it
    pub fn acquire(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| StorageError::io(e, root))?;

        let path = root.join(LOCK_FILE);
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io(e, &path))?;

        match file.try_lock_exclusive() {
            Ok(true) => {}
            Ok(false) => return Err(StorageError::Locked(path)),
            Err(e) => return Err(StorageError::io(e, path)),
        }

        // Owner pid, for humans inspecting the root
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| StorageError::io(e, &path))?;

        debug!(lock = %path.display(), "Acquired cache root lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
