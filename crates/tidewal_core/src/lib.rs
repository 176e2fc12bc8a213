//! # tidewal core
//!
//! A crash-safe, segmented write-ahead log suitable for backing a
//! replicated state machine.
//!
//! The log is an append-only sequence of CRC-chained records stored in
//! fixed-size, preallocated segment files. It is the sole durable truth
//! for recent state changes: after an arbitrary crash, reopening the
//! log recovers exactly the prefix that reached the disk, with torn
//! tail writes truncated and any other damage reported as corruption.
//!
//! - [`Wal`]: create, open, replay, append, rotate, sync
//! - [`Encoder`] / [`Decoder`]: the record framing and recovery paths
//! - [`PageWriter`]: page-aligned buffered writes
//! - [`Record`], [`LogEntry`], [`HardState`]: the data model
//!
//! ## Example
//!
//! ```no_run
//! use tidewal_core::{LogEntry, Wal, WalConfig};
//! use std::path::Path;
//!
//! # fn main() -> tidewal_core::WalResult<()> {
//! let dir = Path::new("/var/lib/node/wal");
//! let mut wal = Wal::create(dir, b"node-1", WalConfig::default())?;
//! wal.save(
//!     &[LogEntry {
//!         index: 0,
//!         term: 1,
//!         command_name: "put".into(),
//!         command: b"k=v".to_vec(),
//!     }],
//!     true,
//! )?;
//! wal.close()?;
//!
//! let mut wal = Wal::open(dir, WalConfig::default())?;
//! let (metadata, entries) = wal.read_all()?;
//! assert_eq!(metadata, b"node-1");
//! assert_eq!(entries.len(), 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod crc;
mod decoder;
mod encoder;
mod error;
mod frame;
mod pagewriter;
mod record;
mod segment;
mod wal;

pub use config::{WalConfig, DEFAULT_SEGMENT_SIZE_BYTES};
pub use crc::RollingCrc;
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{WalError, WalResult};
pub use frame::{
    decode_frame_size, encode_frame_size, FRAME_HEADER_SIZE, MIN_SECTOR_SIZE, PAD_MODULO,
    WAL_PAGE_SIZE,
};
pub use pagewriter::PageWriter;
pub use record::{DecodeError, HardState, LogEntry, Record, RecordType, RECORD_HEADER_SIZE};
pub use segment::{parse_wal_name, wal_name};
pub use wal::Wal;
