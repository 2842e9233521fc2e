//! Block device contract required by the filesystem core, plus two reference drivers.

mod file;
#[cfg(test)]
mod file_tests;
mod ram;

pub use file::FileFlash;
pub use ram::{FlashCounters, RamFlash};

use std::io;

use crate::PageId;
use crate::error::{BattFsError, Result};
use crate::header::HEADER_LEN;

/// Value every byte of a page takes after an erase.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Geometry describes the page layout reported by a device when it is opened.
pub struct Geometry {
    pub page_size: usize,
    pub page_count: usize,
}

impl Geometry {
    #[must_use]
    pub const fn new(page_size: usize, page_count: usize) -> Self {
        Self {
            page_size,
            page_count,
        }
    }

    #[must_use]
    /// Payload bytes available in one page once the footer is accounted for.
    pub const fn payload_capacity(&self) -> usize {
        self.page_size.saturating_sub(HEADER_LEN)
    }

    #[must_use]
    pub const fn header_offset(&self) -> usize {
        self.payload_capacity()
    }

    #[must_use]
    pub const fn raw_len(&self) -> u64 {
        (self.page_size as u64) * (self.page_count as u64)
    }

    /// # Errors
    /// Returns [`BattFsError::InvalidGeometry`] if pages cannot hold a footer plus payload,
    /// if the payload does not fit the 16-bit fill field, or if page ids would overflow.
    pub fn validate(&self) -> Result<()> {
        if self.page_size <= HEADER_LEN {
            return Err(BattFsError::InvalidGeometry(format!(
                "page size {} must exceed the {HEADER_LEN} byte header",
                self.page_size
            )));
        }
        if self.payload_capacity() > usize::from(u16::MAX) {
            return Err(BattFsError::InvalidGeometry(format!(
                "payload of {} bytes does not fit the fill field",
                self.payload_capacity()
            )));
        }
        if self.page_count == 0 || self.page_count > usize::from(PageId::MAX) + 1 {
            return Err(BattFsError::InvalidGeometry(format!(
                "page count {} outside 1..={}",
                self.page_count,
                usize::from(PageId::MAX) + 1
            )));
        }
        Ok(())
    }
}

/// FlashDevice is implemented by the hardware (or simulated) driver under a mounted disk.
///
/// Calls are synchronous and blocking. The page cache buffer handed to [`load`](Self::load)
/// and [`save`](Self::save) is always exactly one page long.
pub trait FlashDevice {
    /// open initializes the device and reports its geometry.
    fn open(&mut self) -> io::Result<Geometry>;
    /// read copies bytes from `page` starting at `addr` without touching the page cache.
    ///
    /// # Arguments
    /// * `page` - Physical page to read from.
    /// * `addr` - Byte offset inside the page.
    /// * `buf` - Destination; its length is the requested byte count.
    fn read(&mut self, page: PageId, addr: usize, buf: &mut [u8]) -> io::Result<usize>;
    /// load fills `buf` with the full contents of `page`.
    fn load(&mut self, page: PageId, buf: &mut [u8]) -> io::Result<()>;
    /// save programs `buf` into `page`. The page has been erased beforehand.
    fn save(&mut self, page: PageId, buf: &[u8]) -> io::Result<()>;
    /// erase resets every byte of `page` to [`ERASED_BYTE`].
    fn erase(&mut self, page: PageId) -> io::Result<()>;
    /// close releases the device.
    fn close(&mut self) -> io::Result<()>;
}

pub(crate) fn page_range(geom: &Geometry, page: PageId) -> io::Result<std::ops::Range<usize>> {
    let page = usize::from(page);
    if page >= geom.page_count {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("page {page} out of range (count {})", geom.page_count),
        ));
    }
    let start = page * geom.page_size;
    Ok(start..start + geom.page_size)
}
