//! # tidewal fs
//!
//! File-system primitives for the tidewal write-ahead log.
//!
//! This crate provides the lowest-level file concerns the log depends on:
//!
//! - Exclusive advisory file locks ([`LockedFile`])
//! - Disk-space preallocation ([`preallocate`])
//! - Durability primitives ([`fdatasync`], [`fsync_dir`], [`zero_to_end`])
//! - Buffered segment readers that remember their name and size
//!   ([`FileBufReader`])
//! - Directory listings, extension checks, and atomic renames
//!   ([`read_dir_names`], [`exist_ext`], [`rename`])
//!
//! Nothing here interprets log bytes; the log format lives entirely in
//! `tidewal_core`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod fsync;
mod lock;
mod preallocate;
mod reader;

pub use dir::{exist_ext, read_dir_names, rename};
pub use error::{FsError, FsResult};
pub use fsync::{fdatasync, fsync_dir, zero_to_end};
pub use lock::LockedFile;
pub use preallocate::preallocate;
pub use reader::FileBufReader;
