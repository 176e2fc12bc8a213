//! The write-ahead log controller.
//!
//! Orchestrates the segment lifecycle and the append and recovery
//! paths:
//!
//! - [`Wal::create`] builds segment zero in a sibling `.tmp` directory
//!   and publishes it with an atomic rename, so a crashed create never
//!   leaves a half-initialized log behind.
//! - [`Wal::open`] takes exclusive locks on every live segment and
//!   requires a full [`Wal::read_all`] before any append, so writes can
//!   never land past an unvalidated tail.
//! - [`Wal::open_for_read`] takes no locks and may coexist with a
//!   writer.
//! - [`Wal::save`] appends entries, rotating to a fresh segment between
//!   entries whenever the tail reaches the configured size.
//!
//! Durability is explicit: buffered appends reach the disk only on
//! [`Wal::sync`] (or `sync = true` on save), and segment rotation
//! fsyncs both the old tail and the directory entry of the new one.

use crate::config::WalConfig;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{WalError, WalResult};
use crate::frame::WAL_PAGE_SIZE;
use crate::record::{HardState, LogEntry, Record, RecordType};
use crate::segment::{exist, is_valid_seq, parse_wal_name, read_wal_names, search_index, wal_name};
use chrono::Local;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tidewal_fs::{
    fdatasync, fsync_dir, preallocate, rename, zero_to_end, FileBufReader, LockedFile,
};
use tracing::{info, warn};

/// Whether a log handle may append or only read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalMode {
    Read,
    Append,
}

/// A write-ahead log bound to one directory of segment files.
#[derive(Debug)]
pub struct Wal {
    dir: PathBuf,
    /// Open handle on the log directory, used to fsync entry creations
    /// during cuts. Present only in append mode.
    dir_file: Option<File>,
    config: WalConfig,
    metadata: Vec<u8>,
    state: HardState,
    /// Entry index replay starts from.
    start: u64,
    /// Index of the last entry appended or read.
    enti: u64,
    mode: WalMode,
    decoder: Option<Decoder>,
    encoder: Option<Encoder<File>>,
    /// Exclusive locks on every owned segment; the tail is last.
    locks: Vec<LockedFile>,
}

impl Wal {
    /// Creates a new log in `dir`, which must not already hold one.
    ///
    /// Segment zero is seeded with a CRC record (chain value 0) and the
    /// single metadata record, synced, and published by atomically
    /// renaming the staging directory into place. The returned handle
    /// is in append mode and ready for [`Wal::save`].
    ///
    /// # Errors
    ///
    /// Returns [`WalError::AlreadyExists`] if `dir` holds any `.wal`
    /// file. On any other failure the directory is renamed to a
    /// `.broken.<timestamp>` sibling as a forensic artifact.
    pub fn create(dir: &Path, metadata: &[u8], config: WalConfig) -> WalResult<Self> {
        if exist(dir) {
            return Err(WalError::AlreadyExists {
                dir: dir.to_path_buf(),
            });
        }

        let tmp = sibling_path(dir, ".tmp");
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;

        match Self::create_at(&tmp, dir, metadata, config) {
            Ok(wal) => Ok(wal),
            Err(err) => {
                let _ = fs::remove_dir_all(&tmp);
                cleanup_wal(dir);
                Err(err)
            }
        }
    }

    fn create_at(tmp: &Path, dir: &Path, metadata: &[u8], config: WalConfig) -> WalResult<Self> {
        let seg_path = tmp.join(wal_name(0, 0));
        let locked = LockedFile::create(&seg_path)?;
        preallocate(locked.file(), config.segment_size_bytes)?;
        let encoder = Encoder::from_file(locked.file(), 0)?;

        let mut wal = Self {
            dir: dir.to_path_buf(),
            dir_file: None,
            config,
            metadata: metadata.to_vec(),
            state: HardState::default(),
            start: 0,
            enti: 0,
            mode: WalMode::Append,
            decoder: None,
            encoder: Some(encoder),
            locks: vec![locked],
        };
        wal.save_crc(0)?;
        let mut meta_record = Record::new(RecordType::Metadata, metadata.to_vec());
        wal.encode_record(&mut meta_record)?;
        wal.sync()?;

        rename(tmp, dir)?;
        wal.dir_file = Some(File::open(dir)?);
        fsync_dir(parent_of(dir))?;

        info!(dir = %dir.display(), "created write-ahead log");
        Ok(wal)
    }

    /// Opens an existing log for appending.
    ///
    /// Every live segment is locked exclusively. A full
    /// [`Wal::read_all`] must complete before the first [`Wal::save`].
    ///
    /// # Errors
    ///
    /// Returns [`WalError::NotFound`] if `dir` holds no log and
    /// [`WalError::LockHeld`] if another process owns a segment lock.
    pub fn open(dir: &Path, config: WalConfig) -> WalResult<Self> {
        Self::open_at_index(dir, 0, true, config)
    }

    /// Opens an existing log read-only. No locks are taken and no
    /// encoder is bound; [`Wal::save`] is rejected on this handle.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::NotFound`] if `dir` holds no log.
    pub fn open_for_read(dir: &Path, config: WalConfig) -> WalResult<Self> {
        Self::open_at_index(dir, 0, false, config)
    }

    /// Opens the log read-only, replaying only from the segment whose
    /// name covers `index`. Entries below `index` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::NotFound`] if `dir` holds no log and
    /// [`WalError::Corrupted`] if no segment covers `index`.
    pub fn open_for_read_at(dir: &Path, index: u64, config: WalConfig) -> WalResult<Self> {
        Self::open_at_index(dir, index, false, config)
    }

    /// Opens the log replaying from the segment covering `index`.
    fn open_at_index(dir: &Path, index: u64, write: bool, config: WalConfig) -> WalResult<Self> {
        let names = read_wal_names(dir)?;
        if names.is_empty() {
            return Err(WalError::NotFound {
                dir: dir.to_path_buf(),
            });
        }
        if !is_valid_seq(&names) {
            return Err(WalError::corrupted(
                "",
                0,
                "segment sequence numbers are not contiguous",
            ));
        }
        let first = search_index(&names, index).ok_or_else(|| {
            WalError::corrupted("", 0, format!("no segment covers entry index {index}"))
        })?;

        let mut locks = Vec::new();
        let mut readers = Vec::new();
        for name in &names[first..] {
            let path = dir.join(name);
            if write {
                let locked = LockedFile::open(&path)?;
                let clone = locked.file().try_clone()?;
                readers.push(FileBufReader::new(clone, name.clone())?);
                locks.push(locked);
            } else {
                readers.push(FileBufReader::open(&path)?);
            }
        }

        let decoder = Decoder::with_options(config.continue_on_crc_error, readers);
        let dir_file = if write { Some(File::open(dir)?) } else { None };

        info!(
            dir = %dir.display(),
            segments = names.len() - first,
            append = write,
            "opened write-ahead log"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            dir_file,
            config,
            metadata: Vec::new(),
            state: HardState::default(),
            start: index,
            enti: 0,
            mode: if write { WalMode::Append } else { WalMode::Read },
            decoder: Some(decoder),
            encoder: None,
            locks,
        })
    }

    /// Replays the whole log, returning its metadata and entries.
    ///
    /// Record dispatch: CRC records must match the running chain and
    /// reseed it; the metadata record is remembered (a second one with
    /// different bytes is [`WalError::MetadataConflict`]); entries are
    /// collected, later writes of the same index superseding earlier
    /// ones; state records update the remembered hard state.
    ///
    /// A torn write at the tail is a clean end of the log, not an
    /// error. In append mode the tail is then truncated to the last
    /// valid frame, its preallocation restored, and the encoder bound
    /// there, so the next [`Wal::save`] continues the durable prefix.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::CrcMismatch`] or [`WalError::Corrupted`] on
    /// damage that is not a torn tail, and [`WalError::InvalidMode`] if
    /// the log was already replayed.
    pub fn read_all(&mut self) -> WalResult<(Vec<u8>, Vec<LogEntry>)> {
        let decoder = self.decoder.take().ok_or_else(|| {
            WalError::invalid_mode("log already replayed; read_all can run only once per open")
        })?;

        let mut metadata: Vec<u8> = Vec::new();
        let mut entries: Vec<LogEntry> = Vec::new();

        loop {
            match decoder.decode() {
                Ok(Some(record)) => match record.rtype {
                    RecordType::Metadata => {
                        if !metadata.is_empty() && metadata != record.data {
                            return Err(WalError::MetadataConflict);
                        }
                        metadata = record.data;
                    }
                    RecordType::Entry => {
                        let entry = LogEntry::decode(&record.data).map_err(|err| {
                            WalError::decode_failure("", decoder.last_offset(), err)
                        })?;
                        if let Some(up) = entry.index.checked_sub(self.start) {
                            // A replayed index supersedes anything the
                            // previous pass appended past it.
                            let up = up as usize;
                            if up < entries.len() {
                                entries.truncate(up);
                            }
                            self.enti = entry.index;
                            entries.push(entry);
                        }
                    }
                    RecordType::State => {
                        self.state = HardState::decode(&record.data).map_err(|err| {
                            WalError::decode_failure("", decoder.last_offset(), err)
                        })?;
                    }
                    RecordType::Crc => {
                        let computed = decoder.last_crc();
                        if computed != 0 && record.crc != computed {
                            return Err(WalError::CrcMismatch {
                                expected: record.crc,
                                computed,
                                file: String::new(),
                                offset: decoder.last_offset(),
                            });
                        }
                        decoder.update_crc(record.crc);
                    }
                    RecordType::Snapshot => {
                        // Snapshot payloads are opaque to the log; the
                        // CRC chain has already vouched for the bytes.
                    }
                },
                Ok(None) => break,
                Err(err @ WalError::UnexpectedEof { .. }) => {
                    if !decoder.is_at_tail() {
                        return Err(err);
                    }
                    info!(error = %err, "log ends with a torn write; truncating there");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if self.mode == WalMode::Append {
            // Reset the tail to the end of the durable prefix. Stale
            // bytes past it are zeroed so a later reopen cannot see a
            // half-overwritten suffix of the torn frame.
            let tail = self.locks.last().ok_or_else(|| {
                WalError::invalid_mode("append-mode log has no tail segment")
            })?;
            let file = tail.file();
            let mut fref = file;
            fref.seek(SeekFrom::Start(decoder.last_offset()))?;
            zero_to_end(file)?;
            self.encoder = Some(Encoder::from_file(file, decoder.last_crc())?);

            if decoder.last_offset() == 0 {
                // A crash between cut and the first flush leaves the
                // fresh tail without its CRC seed; restore it so every
                // segment opens with one.
                self.save_crc(decoder.last_crc())?;
            }
        }

        self.metadata = metadata.clone();
        Ok((metadata, entries))
    }

    /// Appends `entries` in order, cutting to a new segment between
    /// entries whenever the tail reaches the configured size. With
    /// `sync`, the appended bytes are durable before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::InvalidMode`] on a read-mode handle or
    /// before [`Wal::read_all`] has completed.
    pub fn save(&mut self, entries: &[LogEntry], sync: bool) -> WalResult<()> {
        self.ensure_writable()?;

        for entry in entries {
            let mut record = Record::new(RecordType::Entry, entry.encode());
            self.encode_record(&mut record)?;
            self.enti = entry.index;

            if self.tail_offset() >= self.config.segment_size_bytes {
                self.cut()?;
            }
        }

        if sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Appends a hard-state record. An empty state writes nothing.
    ///
    /// # Errors
    ///
    /// Same mode requirements as [`Wal::save`].
    pub fn save_state(&mut self, state: &HardState, sync: bool) -> WalResult<()> {
        self.ensure_writable()?;
        if state.is_empty() {
            return Ok(());
        }

        let mut record = Record::new(RecordType::State, state.encode());
        self.encode_record(&mut record)?;
        self.state = *state;

        if self.tail_offset() >= self.config.segment_size_bytes {
            self.cut()?;
        }
        if sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Flushes buffered frames and fsyncs the tail segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or fsync fails.
    pub fn sync(&mut self) -> WalResult<()> {
        let Some(encoder) = &self.encoder else {
            return Ok(());
        };
        encoder.flush()?;
        if let Some(tail) = self.locks.last() {
            fdatasync(tail.file())?;
        }
        Ok(())
    }

    /// Unlocks and closes every segment strictly older than the one
    /// covering `index`. The tail is always retained.
    ///
    /// # Errors
    ///
    /// Returns an error if a held segment's name cannot be parsed.
    pub fn release_lock_to(&mut self, index: u64) -> WalResult<()> {
        if self.locks.is_empty() {
            return Ok(());
        }

        let mut smaller = self.locks.len() - 1;
        for (i, lock) in self.locks.iter().enumerate() {
            let (_, first_index) = parse_wal_name(&lock.file_name())?;
            if first_index >= index {
                if i == 0 {
                    return Ok(());
                }
                smaller = i - 1;
                break;
            }
        }
        if smaller == 0 {
            return Ok(());
        }

        self.locks.drain(..smaller);
        info!(index, retained = self.locks.len(), "released obsolete segment locks");
        Ok(())
    }

    /// Flushes, syncs, and releases every lock and handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; locks are released
    /// regardless when the handle drops.
    pub fn close(&mut self) -> WalResult<()> {
        if self.encoder.is_some() {
            self.sync()?;
        }
        self.encoder = None;
        self.decoder = None;
        self.locks.clear();
        self.dir_file = None;
        Ok(())
    }

    /// Returns true if `dir` holds any `.wal` file.
    #[must_use]
    pub fn exists(dir: &Path) -> bool {
        exist(dir)
    }

    /// Returns the metadata read by [`Wal::read_all`] or passed to
    /// [`Wal::create`].
    #[must_use]
    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    /// Returns the last hard state read or saved.
    #[must_use]
    pub fn state(&self) -> &HardState {
        &self.state
    }

    /// Returns the index of the last entry appended or read.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.enti
    }

    /// Returns the tail segment's file name, if this handle owns one.
    #[must_use]
    pub fn tail_name(&self) -> Option<String> {
        self.locks.last().map(LockedFile::file_name)
    }

    /// Rotates to a fresh segment.
    ///
    /// The old tail is flushed, padded out to a page boundary with
    /// zeros, and fsynced. The new segment is preallocated, locked, and
    /// seeded with a CRC record carrying the running chain value; the
    /// directory entry is fsynced before appends continue.
    fn cut(&mut self) -> WalResult<()> {
        let prev_crc = {
            let encoder = self.encoder.as_ref().ok_or_else(|| {
                WalError::invalid_mode("no encoder bound to the tail segment")
            })?;
            encoder.flush()?;
            encoder.crc_sum()
        };

        let seq = {
            let tail = self.locks.last().ok_or_else(|| {
                WalError::invalid_mode("append-mode log has no tail segment")
            })?;
            let file = tail.file();
            let mut fref = file;
            let off = fref.seek(SeekFrom::Current(0))?;
            let pad = (WAL_PAGE_SIZE as u64 - off % WAL_PAGE_SIZE as u64) % WAL_PAGE_SIZE as u64;
            if pad > 0 {
                fref.write_all(&vec![0u8; pad as usize])?;
            }
            fdatasync(file)?;

            parse_wal_name(&tail.file_name())?.0
        };

        let name = wal_name(seq + 1, self.enti + 1);
        let path = self.dir.join(&name);
        let locked = LockedFile::create(&path)?;
        preallocate(locked.file(), self.config.segment_size_bytes)?;
        let encoder = Encoder::from_file(locked.file(), prev_crc)?;
        self.locks.push(locked);
        // Replacing the encoder drops the old tail's write handle; its
        // lock and read handle stay behind in `locks`.
        self.encoder = Some(encoder);
        self.save_crc(prev_crc)?;

        if let Some(dir_file) = &self.dir_file {
            dir_file.sync_all()?;
        }

        info!(segment = %name, "cut to new segment");
        Ok(())
    }

    /// Writes the CRC seed record for a fresh segment. The encoder was
    /// just seeded with `prev_crc`, so the stamped value equals it.
    fn save_crc(&self, prev_crc: u32) -> WalResult<()> {
        let mut record = Record::crc_seed(prev_crc);
        self.encode_record(&mut record)
    }

    fn encode_record(&self, record: &mut Record) -> WalResult<()> {
        match &self.encoder {
            Some(encoder) => encoder.encode(record),
            None => Err(WalError::invalid_mode("no encoder bound to the tail segment")),
        }
    }

    fn ensure_writable(&self) -> WalResult<()> {
        if self.mode != WalMode::Append {
            return Err(WalError::invalid_mode("log is opened in read mode"));
        }
        if self.encoder.is_none() {
            return Err(WalError::invalid_mode(
                "read_all must complete before appending",
            ));
        }
        Ok(())
    }

    /// Logical byte offset of the tail, including buffered frames.
    fn tail_offset(&self) -> u64 {
        self.encoder.as_ref().map_or(0, Encoder::offset)
    }
}

/// Builds `<dir><suffix>` alongside `dir`.
fn sibling_path(dir: &Path, suffix: &str) -> PathBuf {
    let mut os = dir.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Returns the containing directory of `dir`, falling back to the
/// current directory for bare relative paths.
fn parent_of(dir: &Path) -> &Path {
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Renames a damaged log directory to a timestamped `.broken` sibling.
/// The artifact is never deleted; failures are logged and swallowed so
/// the original error stays primary.
fn cleanup_wal(dir: &Path) {
    if !dir.exists() {
        return;
    }
    let stamp = Local::now().format("%Y%m%d.%H%M%S.%6f");
    let broken = sibling_path(dir, &format!(".broken.{stamp}"));
    match rename(dir, &broken) {
        Ok(()) => warn!(
            from = %dir.display(),
            to = %broken.display(),
            "renamed broken log directory"
        ),
        Err(err) => warn!(
            dir = %dir.display(),
            error = %err,
            "failed to rename broken log directory"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(index: u64, payload: &[u8]) -> LogEntry {
        LogEntry {
            index,
            term: 1,
            command_name: format!("command#{index}"),
            command: payload.to_vec(),
        }
    }

    #[test]
    fn create_names_segment_zero() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");

        let mut wal = Wal::create(&dir, b"somedata", WalConfig::default()).unwrap();
        assert_eq!(wal.tail_name().unwrap(), wal_name(0, 0));
        assert_eq!(wal.metadata(), b"somedata");
        assert!(Wal::exists(&dir));
        wal.close().unwrap();
    }

    #[test]
    fn create_preallocates_segment() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let config = WalConfig::new().segment_size_bytes(1 << 16);

        let mut wal = Wal::create(&dir, b"m", config).unwrap();
        let len = fs::metadata(dir.join(wal_name(0, 0))).unwrap().len();
        assert_eq!(len, 1 << 16);
        wal.close().unwrap();
    }

    #[test]
    fn save_before_read_all_is_invalid() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        Wal::create(&dir, b"m", WalConfig::default())
            .unwrap()
            .close()
            .unwrap();

        let mut wal = Wal::open(&dir, WalConfig::default()).unwrap();
        let err = wal.save(&[entry(0, b"x")], false).unwrap_err();
        assert!(matches!(err, WalError::InvalidMode { .. }));

        wal.read_all().unwrap();
        wal.save(&[entry(0, b"x")], true).unwrap();
        wal.close().unwrap();
    }

    #[test]
    fn save_on_read_handle_is_invalid() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        Wal::create(&dir, b"m", WalConfig::default())
            .unwrap()
            .close()
            .unwrap();

        let mut wal = Wal::open_for_read(&dir, WalConfig::default()).unwrap();
        wal.read_all().unwrap();
        let err = wal.save(&[entry(0, b"x")], false).unwrap_err();
        assert!(matches!(err, WalError::InvalidMode { .. }));
    }

    #[test]
    fn read_all_runs_once_per_open() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        Wal::create(&dir, b"m", WalConfig::default())
            .unwrap()
            .close()
            .unwrap();

        let mut wal = Wal::open_for_read(&dir, WalConfig::default()).unwrap();
        wal.read_all().unwrap();
        assert!(matches!(
            wal.read_all(),
            Err(WalError::InvalidMode { .. })
        ));
    }

    #[test]
    fn open_missing_dir_is_not_found() {
        let root = tempdir().unwrap();
        let dir = root.path().join("nothing");
        assert!(matches!(
            Wal::open(&dir, WalConfig::default()),
            Err(WalError::NotFound { .. })
        ));
    }

    #[test]
    fn open_empty_dir_is_not_found() {
        let root = tempdir().unwrap();
        assert!(matches!(
            Wal::open(root.path(), WalConfig::default()),
            Err(WalError::NotFound { .. })
        ));
    }

    #[test]
    fn release_lock_to_keeps_covering_segment() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let config = WalConfig::new().segment_size_bytes(2048);

        let mut wal = Wal::create(&dir, b"m", config.clone()).unwrap();
        for i in 0..12u64 {
            wal.save(&[entry(i, &[0x42; 500])], true).unwrap();
        }
        assert!(wal.locks.len() >= 3, "expected several segments");

        let held_before = wal.locks.len();
        wal.release_lock_to(wal.enti).unwrap();
        assert!(wal.locks.len() < held_before);

        // The remaining head must still cover the requested index.
        let (_, first_index) = parse_wal_name(&wal.locks[0].file_name()).unwrap();
        assert!(first_index <= wal.enti);
        wal.close().unwrap();
    }
}
