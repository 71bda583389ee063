//! Advisory file locks.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use keel_core::error::{KeelError, Result};

/// Exclusive or shared advisory lock on a file, released on drop.
///
/// The lock is taken on a freshly opened descriptor, so it excludes other
/// processes as well as other threads of this process.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Block until the exclusive lock at `path` is held. Parent directories
    /// are created as needed.
    pub fn lock(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_error(parent, "create directory for", e))?;
        }

        let file = open_for_writing(path)?;
        file.lock_exclusive()
            .map_err(|e| lock_error(path, "lock", e))?;

        tracing::trace!(path = %path.display(), "Acquired lock");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Block until a shared lock at `path` is held. Shared holders exclude
    /// an exclusive holder but not each other. An existing lock file is only
    /// opened for reading.
    pub fn lock_shared(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => open_for_writing(path)?,
            Err(e) => return Err(lock_error(path, "open", e)),
        };
        FileExt::lock_shared(&file).map_err(|e| lock_error(path, "lock", e))?;

        tracing::trace!(path = %path.display(), "Acquired shared lock");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

fn open_for_writing(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| lock_error(path, "open", e))
}

fn lock_error(path: &Path, action: &str, e: io::Error) -> KeelError {
    KeelError::IoError(io::Error::new(
        e.kind(),
        format!("Failed to {} lock file {}: {}", action, path.display(), e),
    ))
}
