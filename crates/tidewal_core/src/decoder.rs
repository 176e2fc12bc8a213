//! Streaming record decoder.
//!
//! Streams records across an ordered list of segment readers. The
//! decoder distinguishes three ways a read can end:
//!
//! ## Clean end (`Ok(None)`)
//!
//! - End of the last segment, or a zero length word (the preallocated
//!   slack past the last frame).
//!
//! ## Torn write (`Err(UnexpectedEof)`)
//!
//! - A length word or frame body cut short at the tail.
//! - A frame whose claimed length exceeds the bytes remaining in its
//!   segment.
//! - A frame in the final segment containing a fully-zero sector-aligned
//!   chunk: a sector that never reached the disk before the crash.
//!
//! Torn writes mark the truncation point of an interrupted append. They
//! are recoverable; the controller treats them as the end of the log.
//!
//! ## Corruption (`Err(CrcMismatch)` / `Err(Corrupted)`)
//!
//! - A stored CRC that disagrees with the running chain on a frame that
//!   is not torn.
//! - A payload that fails to deserialize and is not torn.
//!
//! Corruption is fatal: recovery must not silently drop durable
//! records.

use crate::crc::RollingCrc;
use crate::error::{WalError, WalResult};
use crate::frame::{decode_frame_size, FRAME_HEADER_SIZE, MIN_SECTOR_SIZE};
use crate::record::{Record, RecordType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use tidewal_fs::FileBufReader;

/// Decodes records from an ordered list of segment readers.
///
/// Interior state is mutex-guarded as a defensive measure, matching the
/// encoder.
#[derive(Debug)]
pub struct Decoder {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    readers: VecDeque<FileBufReader>,
    last_valid_offset: u64,
    crc: RollingCrc,
    continue_on_crc_error: bool,
}

impl Decoder {
    /// Creates a decoder over `readers`, sorted by segment sequence.
    #[must_use]
    pub fn new(readers: Vec<FileBufReader>) -> Self {
        Self::with_options(false, readers)
    }

    /// Creates a decoder that optionally skips non-torn CRC mismatches.
    #[must_use]
    pub fn with_options(continue_on_crc_error: bool, readers: Vec<FileBufReader>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                readers: readers.into(),
                last_valid_offset: 0,
                crc: RollingCrc::new(0),
                continue_on_crc_error,
            }),
        }
    }

    /// Decodes the next record.
    ///
    /// Returns `Ok(None)` at the clean end of the log.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::UnexpectedEof`] for a torn tail,
    /// [`WalError::CrcMismatch`] for a non-torn integrity failure, and
    /// [`WalError::Corrupted`] for a payload that is neither.
    pub fn decode(&self) -> WalResult<Option<Record>> {
        self.inner.lock().decode()
    }

    /// Returns the offset just past the last successfully decoded frame
    /// within the current segment.
    #[must_use]
    pub fn last_offset(&self) -> u64 {
        self.inner.lock().last_valid_offset
    }

    /// Returns the running CRC chain value.
    #[must_use]
    pub fn last_crc(&self) -> u32 {
        self.inner.lock().crc.sum()
    }

    /// Reseeds the running CRC, continuing the chain across a segment
    /// boundary.
    pub fn update_crc(&self, prev_crc: u32) {
        self.inner.lock().crc = RollingCrc::new(prev_crc);
    }

    /// Returns true when at most one segment remains to read. Only then
    /// can an unexpected end be a torn tail rather than mid-log damage.
    #[must_use]
    pub fn is_at_tail(&self) -> bool {
        self.inner.lock().readers.len() <= 1
    }
}

/// One frame as read from a segment, before record decoding.
enum FrameRead {
    /// The segment is exhausted (EOF or zero length word).
    EndOfSegment,
    /// A full frame was read.
    Frame {
        len_field: u64,
        padding: u64,
        data: Vec<u8>,
    },
}

impl Inner {
    fn decode(&mut self) -> WalResult<Option<Record>> {
        loop {
            let frame = match self.readers.front_mut() {
                None => return Ok(None),
                Some(reader) => read_frame(reader, self.last_valid_offset)?,
            };

            let (len_field, padding, data) = match frame {
                FrameRead::EndOfSegment => {
                    self.readers.pop_front();
                    if self.readers.is_empty() {
                        // Keep last_valid_offset: it marks where appends
                        // resume in the tail segment.
                        return Ok(None);
                    }
                    self.last_valid_offset = 0;
                    continue;
                }
                FrameRead::Frame {
                    len_field,
                    padding,
                    data,
                } => (len_field, padding, data),
            };

            let record = match Record::decode(&data[..len_field as usize]) {
                Ok(record) => record,
                Err(err) => {
                    if self.is_torn_entry(&data) {
                        return Err(WalError::unexpected_eof(
                            self.current_name(),
                            self.last_valid_offset,
                            "torn record payload at log tail",
                        ));
                    }
                    return Err(WalError::decode_failure(
                        self.current_name(),
                        self.last_valid_offset,
                        err,
                    ));
                }
            };

            if record.rtype != RecordType::Crc {
                self.crc.update(&record.data);
                let computed = self.crc.sum();
                if record.crc != computed {
                    if self.is_torn_entry(&data) {
                        return Err(WalError::unexpected_eof(
                            self.current_name(),
                            self.last_valid_offset,
                            "torn write detected",
                        ));
                    }
                    if self.continue_on_crc_error {
                        // Skip the bad frame and keep going.
                        self.last_valid_offset += FRAME_HEADER_SIZE + len_field + padding;
                        continue;
                    }
                    return Err(WalError::CrcMismatch {
                        expected: record.crc,
                        computed,
                        file: self.current_name(),
                        offset: self.last_valid_offset,
                    });
                }
            }

            self.last_valid_offset += FRAME_HEADER_SIZE + len_field + padding;
            return Ok(Some(record));
        }
    }

    /// Determines whether the just-read frame was partially written by
    /// an interrupted append.
    ///
    /// Only the final segment can hold a torn write. The frame's bytes
    /// are walked in chunks aligned to the 512-byte sector grid of the
    /// file; a chunk of all zeros means its sector never made it to disk
    /// before the crash.
    fn is_torn_entry(&self, data: &[u8]) -> bool {
        if self.readers.len() != 1 {
            return false;
        }

        let mut offset = self.last_valid_offset + FRAME_HEADER_SIZE;
        let mut cut = 0usize;
        while cut < data.len() {
            let mut chunk = (MIN_SECTOR_SIZE - offset % MIN_SECTOR_SIZE) as usize;
            if chunk > data.len() - cut {
                chunk = data.len() - cut;
            }
            if data[cut..cut + chunk].iter().all(|&b| b == 0) {
                return true;
            }
            offset += chunk as u64;
            cut += chunk;
        }
        false
    }

    fn current_name(&self) -> String {
        self.readers
            .front()
            .map(|r| r.name().to_string())
            .unwrap_or_default()
    }
}

/// Reads one frame from `reader`.
fn read_frame(reader: &mut FileBufReader, last_valid_offset: u64) -> WalResult<FrameRead> {
    let word = match read_u64_le(reader) {
        Ok(None) => return Ok(FrameRead::EndOfSegment),
        Ok(Some(0)) => return Ok(FrameRead::EndOfSegment),
        Ok(Some(word)) => word,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(WalError::unexpected_eof(
                reader.name(),
                last_valid_offset,
                "torn length word at log tail",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let (len_field, padding) = decode_frame_size(word);

    let entry_limit = reader.size() as i128 - last_valid_offset as i128 - padding as i128;
    if len_field as i128 > entry_limit {
        return Err(WalError::unexpected_eof(
            reader.name(),
            last_valid_offset,
            format!(
                "max entry size limit exceeded, recBytes: {}, fileSize({}) - offset({}) - padBytes({}) = entryLimit({})",
                len_field,
                reader.size(),
                last_valid_offset,
                padding,
                entry_limit
            ),
        ));
    }

    let mut data = vec![0u8; (len_field + padding) as usize];
    if let Err(err) = reader.read_exact(&mut data) {
        if err.kind() == ErrorKind::UnexpectedEof {
            return Err(WalError::unexpected_eof(
                reader.name(),
                last_valid_offset,
                "frame body cut short at log tail",
            ));
        }
        return Err(err.into());
    }

    Ok(FrameRead::Frame {
        len_field,
        padding,
        data,
    })
}

/// Reads a little-endian u64, distinguishing a clean end (`Ok(None)`,
/// zero bytes available) from a torn one (`UnexpectedEof`, one to seven
/// bytes available).
fn read_u64_le(reader: &mut FileBufReader) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "partial length word",
            ));
        }
        filled += n;
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_segment(path: &Path, records: &mut [Record]) -> u32 {
        write_segment_seeded(path, 0, records)
    }

    fn write_segment_seeded(path: &Path, seed: u32, records: &mut [Record]) -> u32 {
        let enc = Encoder::new(Vec::new(), seed, 0);
        for record in records.iter_mut() {
            enc.encode(record).unwrap();
        }
        enc.flush().unwrap();
        let crc = enc.crc_sum();
        fs::write(path, enc.into_inner()).unwrap();
        crc
    }

    fn reader(path: &Path) -> FileBufReader {
        FileBufReader::open(path).unwrap()
    }

    #[test]
    fn empty_decoder_is_clean_eof() {
        let dec = Decoder::new(Vec::new());
        assert!(dec.decode().unwrap().is_none());
    }

    #[test]
    fn decodes_records_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(
            &path,
            &mut [
                Record::new(RecordType::Entry, b"first".to_vec()),
                Record::new(RecordType::Entry, b"second".to_vec()),
            ],
        );

        let dec = Decoder::new(vec![reader(&path)]);
        assert_eq!(dec.decode().unwrap().unwrap().data, b"first");
        assert_eq!(dec.decode().unwrap().unwrap().data, b"second");
        assert!(dec.decode().unwrap().is_none());
    }

    #[test]
    fn zero_word_terminates_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(&path, &mut [Record::new(RecordType::Entry, b"only".to_vec())]);

        // Preallocated slack reads as zeros.
        let mut bytes = fs::read(&path).unwrap();
        let valid = bytes.len() as u64;
        bytes.resize(bytes.len() + 4096, 0);
        fs::write(&path, &bytes).unwrap();

        let dec = Decoder::new(vec![reader(&path)]);
        assert!(dec.decode().unwrap().is_some());
        assert!(dec.decode().unwrap().is_none());
        assert_eq!(dec.last_offset(), valid);
    }

    #[test]
    fn crosses_segment_boundary_with_reseed() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("seg0");
        let second = dir.path().join("seg1");

        let crc = write_segment(&first, &mut [Record::new(RecordType::Entry, b"one".to_vec())]);
        write_segment_seeded(
            &second,
            crc,
            &mut [
                Record::crc_seed(crc),
                Record::new(RecordType::Entry, b"two".to_vec()),
            ],
        );

        let dec = Decoder::new(vec![reader(&first), reader(&second)]);
        assert_eq!(dec.decode().unwrap().unwrap().data, b"one");

        let seed = dec.decode().unwrap().unwrap();
        assert_eq!(seed.rtype, RecordType::Crc);
        assert_eq!(seed.crc, dec.last_crc());
        dec.update_crc(seed.crc);

        assert_eq!(dec.decode().unwrap().unwrap().data, b"two");
        assert!(dec.decode().unwrap().is_none());
    }

    #[test]
    fn truncated_tail_is_unexpected_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(
            &path,
            &mut [
                Record::new(RecordType::Entry, b"kept".to_vec()),
                Record::new(RecordType::Entry, vec![0xAA; 100]),
            ],
        );

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 30]).unwrap();

        let dec = Decoder::new(vec![reader(&path)]);
        let first = dec.decode().unwrap().unwrap();
        assert_eq!(first.data, b"kept");
        let offset_after_first = dec.last_offset();

        assert!(matches!(
            dec.decode(),
            Err(WalError::UnexpectedEof { .. })
        ));
        assert_eq!(dec.last_offset(), offset_after_first);
    }

    #[test]
    fn zeroed_sector_in_tail_is_torn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(
            &path,
            &mut [
                Record::new(RecordType::Entry, b"kept".to_vec()),
                Record::new(RecordType::Entry, vec![0xBB; 2000]),
            ],
        );

        // Zero one whole sector inside the second frame: the sector grid
        // is absolute, so [512, 1024) is a full chunk of that frame.
        let mut bytes = fs::read(&path).unwrap();
        for b in &mut bytes[512..1024] {
            *b = 0;
        }
        fs::write(&path, &bytes).unwrap();

        let dec = Decoder::new(vec![reader(&path)]);
        assert!(dec.decode().unwrap().is_some());
        assert!(matches!(
            dec.decode(),
            Err(WalError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn bit_flip_is_crc_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(
            &path,
            &mut [
                Record::new(RecordType::Entry, b"kept".to_vec()),
                Record::new(RecordType::Entry, vec![0xCC; 64]),
            ],
        );

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() - 20;
        bytes[mid] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let dec = Decoder::new(vec![reader(&path)]);
        assert!(dec.decode().unwrap().is_some());
        assert!(matches!(dec.decode(), Err(WalError::CrcMismatch { .. })));
    }

    #[test]
    fn continue_on_crc_error_skips_bad_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(
            &path,
            &mut [
                Record::new(RecordType::Entry, b"kept".to_vec()),
                Record::new(RecordType::Entry, vec![0xCC; 64]),
                Record::new(RecordType::Entry, b"after".to_vec()),
            ],
        );

        let mut bytes = fs::read(&path).unwrap();
        // Flip a byte inside the middle frame's payload.
        bytes[8 + 16 + 8 + 20] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let dec = Decoder::with_options(true, vec![reader(&path)]);
        assert_eq!(dec.decode().unwrap().unwrap().data, b"kept");
        // The middle frame is skipped; the chain is broken from there,
        // so the trailing record now mismatches too and is skipped as
        // well.
        assert!(dec.decode().unwrap().is_none());
    }

    #[test]
    fn oversized_length_claim_is_unexpected_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg0");
        write_segment(&path, &mut [Record::new(RecordType::Entry, b"x".to_vec())]);

        // Rewrite the length word to claim more bytes than the file
        // holds.
        let mut bytes = fs::read(&path).unwrap();
        bytes[..8].copy_from_slice(&(1_000_000u64).to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let dec = Decoder::new(vec![reader(&path)]);
        assert!(matches!(
            dec.decode(),
            Err(WalError::UnexpectedEof { .. })
        ));
    }
}
