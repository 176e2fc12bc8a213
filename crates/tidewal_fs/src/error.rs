//! Error types for file-system operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for file-system operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors that can occur in file-system operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the exclusive lock on the file.
    #[error("lock held by another process: {path}")]
    LockHeld {
        /// Path to the contended file.
        path: PathBuf,
    },

    /// The file or directory does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },
}
