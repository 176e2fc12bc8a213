//! Directory listings and renames.

use crate::error::{FsError, FsResult};
use std::fs;
use std::io;
use std::path::Path;

/// Returns the sorted file names inside `dir`.
///
/// # Errors
///
/// Returns [`FsError::NotFound`] if the directory does not exist.
pub fn read_dir_names(dir: &Path) -> FsResult<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound {
            path: dir.to_path_buf(),
        },
        _ => FsError::Io(err),
    })?;

    let mut names = Vec::new();
    for entry in entries {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Returns true if `dir` holds any file whose name ends with `ext`.
///
/// A missing or unreadable directory counts as not holding anything.
#[must_use]
pub fn exist_ext(dir: &Path, ext: &str) -> bool {
    match read_dir_names(dir) {
        Ok(names) => names.iter().any(|n| n.ends_with(ext)),
        Err(_) => false,
    }
}

/// Renames `from` to `to`. Atomic when both paths live on the same
/// file system; callers publishing a staging directory rely on that.
///
/// # Errors
///
/// Returns an error if the rename fails.
pub fn rename(from: &Path, to: &Path) -> FsResult<()> {
    fs::rename(from, to)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn names_are_sorted() {
        let dir = tempdir().unwrap();
        for name in ["b.wal", "a.wal", "c.tmp"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let names = read_dir_names(dir.path()).unwrap();
        assert_eq!(names, vec!["a.wal", "b.wal", "c.tmp"]);
    }

    #[test]
    fn missing_dir_is_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            read_dir_names(&missing),
            Err(FsError::NotFound { .. })
        ));
    }

    #[test]
    fn exist_ext_matches_extension_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("stray.txt"), b"").unwrap();
        assert!(!exist_ext(dir.path(), ".wal"));

        fs::write(dir.path().join("0.wal"), b"").unwrap();
        assert!(exist_ext(dir.path(), ".wal"));
        assert!(!exist_ext(&dir.path().join("missing"), ".wal"));
    }

    #[test]
    fn rename_moves_directory() {
        let root = tempdir().unwrap();
        let staging = root.path().join("log.tmp");
        let target = root.path().join("log");
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("0.wal"), b"data").unwrap();

        rename(&staging, &target).unwrap();

        assert!(!staging.exists());
        assert_eq!(fs::read(target.join("0.wal")).unwrap(), b"data");
    }
}
