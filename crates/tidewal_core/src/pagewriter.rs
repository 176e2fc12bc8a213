//! Page-aligned buffered writer.
//!
//! Buffers writes so that flushes to the underlying writer land on
//! page-aligned offsets. Steady-state writes always hit whole pages;
//! partial pages reach the device only at explicit flushes and segment
//! cuts, which keeps write amplification on block devices low.

use std::io::{self, Write};

/// Default buffer size and flush watermark: 128 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// A writer that buffers bytes and flushes on page-aligned boundaries.
///
/// `page_offset` is the initial byte position within a page, so
/// alignment calculations survive opening a segment mid-file. The
/// physical buffer is one page larger than the watermark to absorb the
/// partial page written while reaching alignment.
#[derive(Debug)]
pub struct PageWriter<W: Write> {
    w: W,
    page_size: usize,
    page_offset: usize,
    buffered_bytes: usize,
    buf: Vec<u8>,
    buf_watermark: usize,
}

impl<W: Write> PageWriter<W> {
    /// Creates a page writer over `w`.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero; a zero page size is a programmer
    /// error, not a runtime condition.
    pub fn new(w: W, page_size: usize, page_offset: usize) -> Self {
        assert!(page_size > 0, "page size must be greater than zero");
        Self {
            w,
            page_size,
            page_offset,
            buffered_bytes: 0,
            buf: vec![0u8; DEFAULT_BUFFER_SIZE + page_size],
            buf_watermark: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Writes `data` through the page-alignment buffer.
    ///
    /// Small writes are pure buffer appends. Once the watermark is
    /// crossed, the buffer is topped up to the next page boundary and
    /// flushed; any whole pages remaining in `data` bypass the buffer
    /// entirely.
    pub fn write(&mut self, mut data: &[u8]) -> io::Result<()> {
        if self.buffered_bytes + data.len() <= self.buf_watermark {
            self.buf[self.buffered_bytes..self.buffered_bytes + data.len()]
                .copy_from_slice(data);
            self.buffered_bytes += data.len();
            return Ok(());
        }

        let aligned = (self.page_offset + self.buffered_bytes) % self.page_size == 0;
        if !aligned {
            // Fill up to the next page boundary.
            let mut slack =
                self.page_size - (self.page_offset + self.buffered_bytes) % self.page_size;
            let partial = slack > data.len();
            if partial {
                slack = data.len();
            }
            self.buf[self.buffered_bytes..self.buffered_bytes + slack]
                .copy_from_slice(&data[..slack]);
            self.buffered_bytes += slack;
            data = &data[slack..];
            if partial {
                return Ok(());
            }
        }

        self.flush()?;

        if data.len() >= self.page_size {
            let whole = (data.len() / self.page_size) * self.page_size;
            self.w.write_all(&data[..whole])?;
            data = &data[whole..];
        }

        self.write(data)
    }

    /// Drains the buffer to the underlying writer.
    ///
    /// The drained write is not page-aligned in size; `page_offset` is
    /// advanced so later writes realign. `write_all` is used, so a
    /// partial write from the underlying writer either completes or
    /// surfaces an error before the offset moves.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buffered_bytes == 0 {
            return Ok(());
        }
        self.w.write_all(&self.buf[..self.buffered_bytes])?;
        self.page_offset = (self.page_offset + self.buffered_bytes) % self.page_size;
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Returns a reference to the underlying writer.
    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.w
    }

    /// Unwraps the underlying writer, discarding any buffered bytes.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.w
    }
}
