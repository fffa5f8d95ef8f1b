//! Filesystem abstraction for dmx.
//!
//! This crate provides:
//! - `Filesystem` trait for stat, read, atomic write and directory management
//! - `RealFilesystem` backed by `std::fs`
//! - `MockFilesystem` for in-memory tests, with injectable failures

mod filesystem;

pub use filesystem::{FileStat, Filesystem, FsError, MockFilesystem, RealFilesystem};
