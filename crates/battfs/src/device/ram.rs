use std::io;

use super::{ERASED_BYTE, FlashDevice, Geometry, page_range};
use crate::PageId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlashCounters {
    pub reads: u64,
    pub loads: u64,
    pub saves: u64,
    pub erases: u64,
}

/// RamFlash keeps the whole flash array in memory, starting fully erased.
pub struct RamFlash {
    geom: Geometry,
    mem: Vec<u8>,
    write_protected: bool,
    open: bool,
    pub counters: FlashCounters,
}

impl RamFlash {
    #[must_use]
    pub fn new(page_size: usize, page_count: usize) -> Self {
        Self {
            geom: Geometry::new(page_size, page_count),
            mem: vec![ERASED_BYTE; page_size * page_count],
            write_protected: false,
            open: false,
            counters: FlashCounters::default(),
        }
    }

    /// Rebuild a device from a raw image, e.g. a snapshot taken mid-operation to model a
    /// power cut.
    ///
    /// # Panics
    /// Panics if the image is not a whole number of pages.
    #[must_use]
    pub fn from_image(page_size: usize, mem: Vec<u8>) -> Self {
        assert!(
            page_size > 0 && mem.len() % page_size == 0,
            "image of {} bytes is not a whole number of {page_size} byte pages",
            mem.len()
        );
        Self {
            geom: Geometry::new(page_size, mem.len() / page_size),
            mem,
            write_protected: false,
            open: false,
            counters: FlashCounters::default(),
        }
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geom
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// When set, `save` and `erase` fail with `PermissionDenied`.
    pub const fn set_write_protected(&mut self, on: bool) {
        self.write_protected = on;
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.mem
    }

    /// Direct view of one page, bypassing counters.
    ///
    /// # Panics
    /// Panics if `page` is out of range.
    #[must_use]
    pub fn page(&self, page: PageId) -> &[u8] {
        let start = usize::from(page) * self.geom.page_size;
        &self.mem[start..start + self.geom.page_size]
    }

    /// Overwrite one page without erase semantics or counters.
    ///
    /// # Panics
    /// Panics if `page` is out of range or `data` is longer than a page.
    pub fn program_raw(&mut self, page: PageId, data: &[u8]) {
        let start = usize::from(page) * self.geom.page_size;
        assert!(data.len() <= self.geom.page_size, "data larger than a page");
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.write_protected {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "flash is write protected",
            ));
        }
        Ok(())
    }
}

impl FlashDevice for RamFlash {
    fn open(&mut self) -> io::Result<Geometry> {
        self.open = true;
        Ok(self.geom)
    }

    fn read(&mut self, page: PageId, addr: usize, buf: &mut [u8]) -> io::Result<usize> {
        let range = page_range(&self.geom, page)?;
        self.counters.reads += 1;
        if addr >= self.geom.page_size {
            return Ok(0);
        }
        let n = buf.len().min(self.geom.page_size - addr);
        let src = range.start + addr;
        buf[..n].copy_from_slice(&self.mem[src..src + n]);
        Ok(n)
    }

    fn load(&mut self, page: PageId, buf: &mut [u8]) -> io::Result<()> {
        let range = page_range(&self.geom, page)?;
        self.counters.loads += 1;
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn save(&mut self, page: PageId, buf: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        let range = page_range(&self.geom, page)?;
        self.counters.saves += 1;
        // NOR semantics: programming can only clear bits.
        for (dst, &src) in self.mem[range].iter_mut().zip(buf) {
            *dst &= src;
        }
        Ok(())
    }

    fn erase(&mut self, page: PageId) -> io::Result<()> {
        self.check_writable()?;
        let range = page_range(&self.geom, page)?;
        self.counters.erases += 1;
        self.mem[range].fill(ERASED_BYTE);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}
