//! Record encoder.
//!
//! Serializes records into frames and writes them through the
//! [`PageWriter`]. The encoder owns the running CRC for the segment it
//! is bound to; every record's payload is folded in before the record is
//! stamped and written.

use crate::crc::RollingCrc;
use crate::error::WalResult;
use crate::frame::{encode_frame_size, FRAME_HEADER_SIZE, WAL_PAGE_SIZE};
use crate::pagewriter::PageWriter;
use crate::record::Record;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

/// Reusable serialization buffer: records at or below this size do not
/// allocate per encode.
const SCRATCH_SIZE: usize = 1024 * 1024;

/// Encodes records into a segment.
///
/// Interior state is mutex-guarded as a defensive measure; the public
/// contract still forbids concurrent `save` calls on one log.
#[derive(Debug)]
pub struct Encoder<W: Write> {
    inner: Mutex<Inner<W>>,
}

#[derive(Debug)]
struct Inner<W: Write> {
    bw: PageWriter<W>,
    crc: RollingCrc,
    scratch: Vec<u8>,
    offset: u64,
}

impl<W: Write> Encoder<W> {
    /// Creates an encoder writing to `w`, seeded with the CRC chain
    /// value `prev_crc`, starting at logical byte `offset` within the
    /// segment.
    pub fn new(w: W, prev_crc: u32, offset: u64) -> Self {
        let page_offset = (offset % WAL_PAGE_SIZE as u64) as usize;
        Self {
            inner: Mutex::new(Inner {
                bw: PageWriter::new(w, WAL_PAGE_SIZE, page_offset),
                crc: RollingCrc::new(prev_crc),
                scratch: vec![0u8; SCRATCH_SIZE],
                offset,
            }),
        }
    }

    /// Folds the record's payload into the running CRC, stamps the
    /// record, and writes its frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying writer fails.
    pub fn encode(&self, record: &mut Record) -> WalResult<()> {
        let mut inner = self.inner.lock();

        inner.crc.update(&record.data);
        record.crc = inner.crc.sum();

        let len = record.encoded_len();
        let (word, padding) = encode_frame_size(len);

        inner.bw.write(&word.to_le_bytes())?;
        if len + padding <= inner.scratch.len() {
            let Inner { bw, scratch, .. } = &mut *inner;
            record.encode_to_slice(scratch);
            scratch[len..len + padding].fill(0);
            bw.write(&scratch[..len + padding])?;
        } else {
            let mut data = record.encode();
            data.resize(len + padding, 0);
            inner.bw.write(&data)?;
        }

        inner.offset += FRAME_HEADER_SIZE + (len + padding) as u64;
        Ok(())
    }

    /// Drains buffered frames to the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying writer fails.
    pub fn flush(&self) -> WalResult<()> {
        self.inner.lock().bw.flush()?;
        Ok(())
    }

    /// Returns the current CRC chain value.
    #[must_use]
    pub fn crc_sum(&self) -> u32 {
        self.inner.lock().crc.sum()
    }

    /// Returns the logical byte offset within the segment, including
    /// frames still sitting in the page buffer.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.inner.lock().offset
    }

    /// Unwraps the underlying writer, discarding any unflushed bytes.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.inner.into_inner().bw.into_inner()
    }
}

impl Encoder<File> {
    /// Creates an encoder over a clone of `file`, starting at the
    /// file's current offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be cloned or its position
    /// read.
    pub fn from_file(file: &File, prev_crc: u32) -> WalResult<Self> {
        let mut clone = file.try_clone()?;
        let offset = clone.seek(SeekFrom::Current(0))?;
        Ok(Self::new(clone, prev_crc, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_frame_size;
    use crate::record::{RecordType, RECORD_HEADER_SIZE};

    #[test]
    fn frame_layout() {
        let enc = Encoder::new(Vec::new(), 0, 0);
        let mut record = Record::new(RecordType::Entry, b"hello".to_vec());
        enc.encode(&mut record).unwrap();
        enc.flush().unwrap();

        let bytes = enc.into_inner();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let (len, padding) = decode_frame_size(u64::from_le_bytes(word));

        assert_eq!(len as usize, RECORD_HEADER_SIZE + 5);
        assert_eq!((len + padding) % 8, 0);
        assert_eq!(bytes.len(), 8 + (len + padding) as usize);

        let decoded = Record::decode(&bytes[8..8 + len as usize]).unwrap();
        assert_eq!(decoded.rtype, RecordType::Entry);
        assert_eq!(decoded.data, b"hello");
        assert_eq!(decoded.crc, record.crc);
    }

    #[test]
    fn crc_chain_advances_per_record() {
        let enc = Encoder::new(Vec::new(), 0, 0);

        let mut first = Record::new(RecordType::Entry, b"one".to_vec());
        enc.encode(&mut first).unwrap();
        let after_first = enc.crc_sum();
        assert_eq!(first.crc, after_first);

        let mut second = Record::new(RecordType::Entry, b"two".to_vec());
        enc.encode(&mut second).unwrap();
        assert_ne!(second.crc, after_first);
        assert_eq!(second.crc, enc.crc_sum());
    }

    #[test]
    fn crc_seed_record_leaves_chain_unchanged() {
        let enc = Encoder::new(Vec::new(), 0xABCD, 0);
        let mut seed = Record::crc_seed(0xABCD);
        enc.encode(&mut seed).unwrap();
        // Empty payload: the stamped value is the seed itself.
        assert_eq!(seed.crc, 0xABCD);
        assert_eq!(enc.crc_sum(), 0xABCD);
    }

    #[test]
    fn offset_tracks_buffered_frames() {
        let enc = Encoder::new(Vec::new(), 0, 0);
        assert_eq!(enc.offset(), 0);

        let mut record = Record::new(RecordType::Entry, vec![0xAB; 11]);
        enc.encode(&mut record).unwrap();
        // 8-byte header + 16-byte record payload aligned to 8.
        assert_eq!(enc.offset(), 8 + 16);
    }

    #[test]
    fn large_record_roundtrips() {
        let enc = Encoder::new(Vec::new(), 0, 0);
        let mut record = Record::new(RecordType::Entry, vec![0x5A; SCRATCH_SIZE + 17]);
        enc.encode(&mut record).unwrap();
        enc.flush().unwrap();

        let bytes = enc.into_inner();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let (len, _) = decode_frame_size(u64::from_le_bytes(word));
        let decoded = Record::decode(&bytes[8..8 + len as usize]).unwrap();
        assert_eq!(decoded.data.len(), SCRATCH_SIZE + 17);
    }
}
