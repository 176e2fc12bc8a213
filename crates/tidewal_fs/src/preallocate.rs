//! Disk-space preallocation.

use crate::error::FsResult;
use fs2::FileExt;
use std::fs::File;

/// Preallocates `size` bytes of disk space for `file`.
///
/// This performs a real block allocation (not just a length change), so a
/// size the file system cannot satisfy fails immediately with the
/// underlying `ENOSPC`/`EFBIG` error instead of deferring the failure to
/// a later write.
///
/// # Errors
///
/// Returns an error if the file system cannot allocate the requested
/// space.
pub fn preallocate(file: &File, size: u64) -> FsResult<()> {
    file.allocate(size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn preallocate_extends_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        let file = File::create(&path).unwrap();

        preallocate(&file, 4096).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 4096);
    }

    #[test]
    fn preallocate_absurd_size_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        let file = File::create(&path).unwrap();

        assert!(preallocate(&file, u64::MAX).is_err());
    }
}
