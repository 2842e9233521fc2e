//! BattFS: a log-structured, power-loss tolerant filesystem for raw flash page arrays.
#![allow(clippy::cargo_common_metadata)]

pub mod cache;
pub mod device;
pub mod disk;
pub mod error;
pub mod file;
pub mod header;
pub mod metrics;
pub mod scan;

#[cfg(test)]
mod test_utils;

pub use device::{FlashDevice, Geometry};
pub use disk::BattFs;
pub use error::{BattFsError, Result};
pub use file::{FileHandle, OpenFile, OpenMode};
pub use header::PageHeader;

/// Physical page number on the device.
pub type PageId = u16;
/// Single-byte file identifier.
pub type Inode = u8;
/// Ordinal position of a page within its file.
pub type PgOff = u16;
/// Valid payload bytes in a page.
pub type Fill = u16;
/// 40-bit page version counter.
pub type Seq = u64;
