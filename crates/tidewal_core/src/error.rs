//! Error types for the write-ahead log.

use crate::record::DecodeError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tidewal_fs::FsError;

/// Result type for log operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur in write-ahead log operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The directory holds no log, or does not exist.
    #[error("no write-ahead log found in {dir}")]
    NotFound {
        /// Directory that was searched.
        dir: PathBuf,
    },

    /// `create` was called on a directory that already holds a log.
    #[error("write-ahead log already exists in {dir}")]
    AlreadyExists {
        /// Directory holding the existing log.
        dir: PathBuf,
    },

    /// Another process holds the write lock.
    #[error("write lock held by another process: {path}")]
    LockHeld {
        /// Path to the contended segment file.
        path: PathBuf,
    },

    /// The operation is not valid in the log's current mode.
    #[error("invalid mode: {message}")]
    InvalidMode {
        /// Why the operation is rejected.
        message: String,
    },

    /// The end of the durable prefix was reached mid-frame.
    ///
    /// This marks a torn write: the crash happened before the final frame
    /// was fully on disk. Recovery truncates at this point; it is not
    /// corruption.
    #[error("unexpected end of log in {file} at offset {offset}: {reason}")]
    UnexpectedEof {
        /// Segment file name.
        file: String,
        /// Last valid offset within the segment.
        offset: u64,
        /// What was being read when the log ended.
        reason: String,
    },

    /// A record's stored CRC does not match the running chain.
    #[error(
        "crc mismatch in {file} at offset {offset}: expected {expected:08x}, computed {computed:08x}"
    )]
    CrcMismatch {
        /// CRC value stored in the record.
        expected: u32,
        /// CRC value accumulated by the decoder.
        computed: u32,
        /// Segment file name.
        file: String,
        /// Last valid offset within the segment.
        offset: u64,
    },

    /// The log's bytes are structurally invalid and not a torn tail.
    #[error("corrupted log in {file} at offset {offset}: {reason}")]
    Corrupted {
        /// Segment file name (empty when the defect is directory-level).
        file: String,
        /// Last valid offset within the segment.
        offset: u64,
        /// Description of the defect.
        reason: String,
    },

    /// Two metadata records with different contents were found.
    #[error("conflicting metadata records in log")]
    MetadataConflict,
}

impl WalError {
    /// Creates an invalid-mode error.
    pub fn invalid_mode(message: impl Into<String>) -> Self {
        Self::InvalidMode {
            message: message.into(),
        }
    }

    /// Creates an unexpected-end-of-log error.
    pub fn unexpected_eof(
        file: impl Into<String>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnexpectedEof {
            file: file.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(file: impl Into<String>, offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            file: file.into(),
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn decode_failure(file: impl Into<String>, offset: u64, err: DecodeError) -> Self {
        Self::Corrupted {
            file: file.into(),
            offset,
            reason: err.to_string(),
        }
    }
}

impl From<FsError> for WalError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(err) => Self::Io(err),
            FsError::LockHeld { path } => Self::LockHeld { path },
            FsError::NotFound { path } => Self::NotFound { dir: path },
        }
    }
}
