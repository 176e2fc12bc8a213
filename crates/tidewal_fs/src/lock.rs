//! Exclusive advisory file locks.

use crate::error::{FsError, FsResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A file held under an exclusive advisory lock.
///
/// The lock is taken non-blocking at open time and released when the
/// `LockedFile` (and every handle cloned from it) is dropped. Cloned
/// handles share the underlying open file description, so handing a
/// clone to a writer does not weaken the lock.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
}

impl LockedFile {
    /// Creates (or opens) a file at `path` and takes the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::LockHeld`] if another process owns the lock.
    pub fn create(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::lock(file, path)
    }

    /// Opens an existing file at `path` and takes the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::NotFound`] if the file does not exist and
    /// [`FsError::LockHeld`] if another process owns the lock.
    pub fn open(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => FsError::NotFound {
                    path: path.to_path_buf(),
                },
                _ => FsError::Io(err),
            })?;
        Self::lock(file, path)
    }

    fn lock(file: File, path: &Path) -> FsResult<Self> {
        if file.try_lock_exclusive().is_err() {
            return Err(FsError::LockHeld {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns the locked file handle.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Returns the path the lock was taken on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name component of the locked path.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_prevents_second_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");

        let first = LockedFile::create(&path).unwrap();
        let second = LockedFile::open(&path);
        assert!(matches!(second, Err(FsError::LockHeld { .. })));
        drop(first);
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");

        {
            let _first = LockedFile::create(&path).unwrap();
        }
        let _second = LockedFile::open(&path).unwrap();
    }

    #[test]
    fn clone_keeps_lock_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");

        let locked = LockedFile::create(&path).unwrap();
        let clone = locked.file().try_clone().unwrap();
        drop(clone);

        // Dropping a clone must not release the lock.
        assert!(matches!(
            LockedFile::open(&path),
            Err(FsError::LockHeld { .. })
        ));
        drop(locked);
    }

    #[test]
    fn open_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.wal");
        assert!(matches!(
            LockedFile::open(&path),
            Err(FsError::NotFound { .. })
        ));
    }
}
