//! Record types and their wire forms.
//!
//! A record is the logical unit carried by one frame. Its wire form is a
//! fixed little-endian header followed by the opaque payload:
//!
//! ```text
//! [type: u8] [crc: u32 LE] [data ...]
//! ```
//!
//! Entry and state payloads have their own wire forms, also little-endian
//! with length-prefixed variable fields. All decoding is bounds-checked
//! and returns structured errors; nothing here panics on bad input.

use thiserror::Error;

/// Size of the record header preceding the payload.
pub const RECORD_HEADER_SIZE: usize = 5;

/// Errors produced while decoding records and payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The buffer is smaller than the record header.
    #[error("record too short: {len} bytes")]
    TooShort {
        /// Number of bytes available.
        len: usize,
    },

    /// The record's type tag is not part of the closed set.
    #[error("unknown record type {tag}")]
    UnknownType {
        /// The offending tag byte.
        tag: u8,
    },

    /// A fixed or length-prefixed field extends past the buffer.
    #[error("truncated field: {field}")]
    Truncated {
        /// Name of the field being read.
        field: &'static str,
    },

    /// Bytes remain after the last field.
    #[error("trailing bytes after payload: expected {expected}, got {actual}")]
    TrailingBytes {
        /// Bytes the fields accounted for.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// A command name is not valid UTF-8.
    #[error("command name is not valid UTF-8")]
    InvalidUtf8,
}

/// The closed set of record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// The single metadata record at the head of segment zero.
    Metadata = 1,
    /// A log entry.
    Entry = 2,
    /// A hard-state snapshot (term/vote/commit).
    State = 3,
    /// A CRC seed carrying the chain value at a segment boundary.
    Crc = 4,
    /// A snapshot marker.
    Snapshot = 5,
}

impl RecordType {
    /// Converts a tag byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Metadata),
            2 => Some(Self::Entry),
            3 => Some(Self::State),
            4 => Some(Self::Crc),
            5 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to its tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One CRC-protected unit written to a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record's type tag.
    pub rtype: RecordType,
    /// For most records, the running chain value after `data` is folded
    /// in; for [`RecordType::Crc`] records, the seed for the segment.
    pub crc: u32,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl Record {
    /// Creates a record with an unset CRC; the encoder stamps it.
    #[must_use]
    pub fn new(rtype: RecordType, data: Vec<u8>) -> Self {
        Self {
            rtype,
            crc: 0,
            data,
        }
    }

    /// Creates an empty CRC seed record.
    #[must_use]
    pub fn crc_seed(crc: u32) -> Self {
        Self {
            rtype: RecordType::Crc,
            crc,
            data: Vec::new(),
        }
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.data.len()
    }

    /// Encodes the record into the front of `buf`, returning the number
    /// of bytes written. `buf` must be at least [`Self::encoded_len`]
    /// bytes long.
    pub fn encode_to_slice(&self, buf: &mut [u8]) -> usize {
        let n = self.encoded_len();
        buf[0] = self.rtype.as_byte();
        buf[1..5].copy_from_slice(&self.crc.to_le_bytes());
        buf[5..n].copy_from_slice(&self.data);
        n
    }

    /// Encodes the record into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.encode_to_slice(&mut buf);
        buf
    }

    /// Decodes a record from its wire form.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the buffer is shorter than the
    /// header or the type tag is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(DecodeError::TooShort { len: buf.len() });
        }
        let rtype =
            RecordType::from_byte(buf[0]).ok_or(DecodeError::UnknownType { tag: buf[0] })?;
        let crc = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        Ok(Self {
            rtype,
            crc,
            data: buf[RECORD_HEADER_SIZE..].to_vec(),
        })
    }
}

/// One entry of the replicated log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the log; unique and strictly increasing.
    pub index: u64,
    /// Leader term the entry was proposed in; non-decreasing.
    pub term: u64,
    /// Name of the command carried by this entry.
    pub command_name: String,
    /// Opaque command payload.
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Serializes the entry.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(8 + 8 + 4 + self.command_name.len() + 4 + self.command.len());
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.term.to_le_bytes());
        buf.extend_from_slice(&(self.command_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.command_name.as_bytes());
        buf.extend_from_slice(&(self.command.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.command);
        buf
    }

    /// Deserializes an entry, rejecting truncated or trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if any field extends past the buffer,
    /// bytes remain after the last field, or the command name is not
    /// UTF-8.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(buf);
        let index = cursor.read_u64("index")?;
        let term = cursor.read_u64("term")?;
        let name_bytes = cursor.read_len_prefixed("command_name")?;
        let command_name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| DecodeError::InvalidUtf8)?;
        let command = cursor.read_len_prefixed("command")?.to_vec();
        cursor.finish()?;
        Ok(Self {
            index,
            term,
            command_name,
            command,
        })
    }
}

/// The durable hard state of the state machine: term, vote, and commit
/// index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardState {
    /// Current term.
    pub term: u64,
    /// Voted-for node in the current term.
    pub vote: u64,
    /// Highest committed entry index.
    pub commit: u64,
}

impl HardState {
    /// Returns true when no field has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Serializes the state.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&self.term.to_le_bytes());
        buf.extend_from_slice(&self.vote.to_le_bytes());
        buf.extend_from_slice(&self.commit.to_le_bytes());
        buf
    }

    /// Deserializes the state.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the buffer is not exactly three
    /// little-endian words.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(buf);
        let term = cursor.read_u64("term")?;
        let vote = cursor.read_u64("vote")?;
        let commit = cursor.read_u64("commit")?;
        cursor.finish()?;
        Ok(Self { term, vote, commit })
    }
}

/// Bounds-checked reader over a payload buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        let bytes = self.take(8, field)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(word))
    }

    fn read_len_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let bytes = self.take(4, field)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        let len = u32::from_le_bytes(word) as usize;
        self.take(len, field)
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DecodeError::Truncated { field })?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated { field });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn finish(&self) -> Result<(), DecodeError> {
        if self.pos != self.buf.len() {
            return Err(DecodeError::TrailingBytes {
                expected: self.pos,
                actual: self.buf.len(),
            });
        }
        Ok(())
    }
}
