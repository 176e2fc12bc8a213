//! Segment file naming and directory scanning.
//!
//! Segments are named `<seq>-<index>.wal` where both fields are
//! 16-digit zero-padded lowercase hex: `seq` is the segment's position
//! in the rotation order and `index` is the first entry index written
//! into it.

use crate::error::{WalError, WalResult};
use std::path::Path;
use tidewal_fs::{exist_ext, read_dir_names};
use tracing::warn;

/// Extension carried by every segment file.
pub const SEGMENT_EXT: &str = ".wal";

/// Builds a segment file name from its sequence and first entry index.
#[must_use]
pub fn wal_name(seq: u64, index: u64) -> String {
    format!("{seq:016x}-{index:016x}{SEGMENT_EXT}")
}

/// Parses a segment file name into `(seq, index)`.
///
/// # Errors
///
/// Returns [`WalError::Corrupted`] if the name does not match the
/// segment naming scheme.
pub fn parse_wal_name(name: &str) -> WalResult<(u64, u64)> {
    let bad = || WalError::corrupted(name, 0, "not a valid segment file name");

    let stem = name.strip_suffix(SEGMENT_EXT).ok_or_else(bad)?;
    let (seq_hex, index_hex) = stem.split_once('-').ok_or_else(bad)?;
    if seq_hex.len() != 16 || index_hex.len() != 16 {
        return Err(bad());
    }
    let seq = u64::from_str_radix(seq_hex, 16).map_err(|_| bad())?;
    let index = u64::from_str_radix(index_hex, 16).map_err(|_| bad())?;
    Ok((seq, index))
}

/// Returns the sorted segment file names in `dir`, skipping files that
/// are not segments.
///
/// # Errors
///
/// Returns [`WalError::NotFound`] if the directory does not exist.
pub fn read_wal_names(dir: &Path) -> WalResult<Vec<String>> {
    let mut names = Vec::new();
    for name in read_dir_names(dir)? {
        if parse_wal_name(&name).is_ok() {
            names.push(name);
        } else if name.ends_with(SEGMENT_EXT) {
            warn!(file = %name, "ignoring unparseable segment file name");
        }
    }
    Ok(names)
}

/// Returns true if the sorted `names` carry contiguous sequence
/// numbers.
#[must_use]
pub fn is_valid_seq(names: &[String]) -> bool {
    let mut expected = None;
    for name in names {
        let Ok((seq, _)) = parse_wal_name(name) else {
            return false;
        };
        match expected {
            Some(want) if seq != want => return false,
            _ => {}
        }
        expected = Some(seq + 1);
    }
    true
}

/// Returns the position of the last name whose first entry index is at
/// most `index`: the segment replay must start from.
#[must_use]
pub fn search_index(names: &[String], index: u64) -> Option<usize> {
    for (i, name) in names.iter().enumerate().rev() {
        let Ok((_, first_index)) = parse_wal_name(name) else {
            continue;
        };
        if first_index <= index {
            return Some(i);
        }
    }
    None
}

/// Returns true if `dir` holds any `.wal` file.
///
/// Deliberately broader than [`read_wal_names`]: a directory polluted
/// with an unparseable `.wal` file still counts as occupied, so
/// `create` refuses it instead of clobbering it.
#[must_use]
pub fn exist(dir: &Path) -> bool {
    exist_ext(dir, SEGMENT_EXT)
}
