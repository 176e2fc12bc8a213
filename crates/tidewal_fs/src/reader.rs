//! Buffered segment readers.

use crate::error::FsResult;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// A buffered reader over a segment file that remembers the file's name
/// and size.
///
/// Decoders need both: the size bounds how large a frame can claim to
/// be, and the name goes into error messages so a corrupt segment can be
/// identified from the failure alone.
#[derive(Debug)]
pub struct FileBufReader {
    inner: BufReader<File>,
    name: String,
    size: u64,
}

impl FileBufReader {
    /// Wraps an open file handle, capturing its current size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file's metadata cannot be read.
    pub fn new(file: File, name: impl Into<String>) -> FsResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            inner: BufReader::new(file),
            name: name.into(),
            size,
        })
    }

    /// Opens the file at `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> FsResult<Self> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(file, name)
    }

    /// Returns the file name this reader was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file's size at open time.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for FileBufReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
