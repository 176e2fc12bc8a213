//! Durability primitives.

use crate::error::FsResult;
use crate::preallocate::preallocate;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// Flushes a file's data (not necessarily its metadata) to disk.
///
/// # Errors
///
/// Returns an error if the underlying sync fails.
pub fn fdatasync(file: &File) -> FsResult<()> {
    file.sync_data()?;
    Ok(())
}

/// Syncs a directory so that entry creations and renames inside it are
/// durable.
///
/// On Windows, directory handles cannot be fsynced; the NTFS journal
/// provides equivalent metadata durability, so this is a no-op there.
#[cfg(unix)]
pub fn fsync_dir(path: &Path) -> FsResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Syncs a directory so that entry creations and renames inside it are
/// durable.
#[cfg(not(unix))]
pub fn fsync_dir(_path: &Path) -> FsResult<()> {
    Ok(())
}

/// Discards everything past the file's current offset while keeping the
/// file's length and allocation.
///
/// The file is truncated at the current offset and then re-extended to
/// its previous length, so any stale bytes past the offset read back as
/// zeros. The offset is left where it was.
///
/// # Errors
///
/// Returns an error if the truncate, reallocation, or seek fails.
pub fn zero_to_end(file: &File) -> FsResult<()> {
    let off = (&*file).seek(SeekFrom::Current(0))?;
    let len = file.metadata()?.len();

    file.set_len(off)?;
    preallocate(file, len)?;
    (&*file).seek(SeekFrom::Start(off))?;
    Ok(())
}
