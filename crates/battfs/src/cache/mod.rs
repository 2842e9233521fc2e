//! Single-page write-back cache shared by every open file of a mounted disk.

#[cfg(test)]
mod cache_tests;

use tracing::trace;

use crate::PageId;
use crate::device::{ERASED_BYTE, FlashDevice, Geometry};
use crate::error::Result;
use crate::header::{HEADER_LEN, PageHeader};
use crate::metrics::{self, FlashOpKind};

pub struct PageCache {
    page: Option<PageId>,
    buf: Vec<u8>,
    dirty: bool,
    /// Previous physical copy of the cached page, erased once the new copy is saved.
    superseded: Option<PageId>,
}

impl PageCache {
    #[must_use]
    pub fn new(geom: &Geometry) -> Self {
        Self {
            page: None,
            buf: vec![ERASED_BYTE; geom.page_size],
            dirty: false,
            superseded: None,
        }
    }

    #[must_use]
    pub const fn page(&self) -> Option<PageId> {
        self.page
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub const fn superseded(&self) -> Option<PageId> {
        self.superseded
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.buf.len()
    }

    /// `load` makes `page` the cached page, flushing the current one first.
    ///
    /// # Errors
    /// Returns an error if flushing the current page or reading the new one fails.
    pub fn load<D: FlashDevice>(&mut self, dev: &mut D, page: PageId) -> Result<()> {
        if self.page == Some(page) {
            return Ok(());
        }
        self.flush(dev)?;

        trace!(page, "cache load");
        self.page = None;
        let res = dev.load(page, &mut self.buf);
        metrics::record(page, FlashOpKind::Load, self.buf.len(), &res);
        res?;
        self.page = Some(page);
        Ok(())
    }

    /// `flush` writes a dirty buffer back: erase the target, program it, then erase the
    /// superseded copy. Clean buffers are left alone.
    ///
    /// # Errors
    /// Returns an error if any device call fails. The buffer stays dirty if the new copy
    /// could not be programmed.
    pub fn flush<D: FlashDevice>(&mut self, dev: &mut D) -> Result<()> {
        let Some(page) = self.page.filter(|_| self.dirty) else {
            return Ok(());
        };

        trace!(page, superseded = ?self.superseded, "cache flush");
        let res = dev.erase(page);
        metrics::record(page, FlashOpKind::Erase, self.buf.len(), &res);
        res?;
        let res = dev.save(page, &self.buf);
        metrics::record(page, FlashOpKind::Save, self.buf.len(), &res);
        res?;
        self.dirty = false;

        if let Some(old) = self.superseded.take() {
            let res = dev.erase(old);
            metrics::record(old, FlashOpKind::Erase, self.buf.len(), &res);
            res?;
        }
        Ok(())
    }

    /// Copy bytes out of the buffer.
    ///
    /// # Panics
    /// Panics if the range runs past the end of the page.
    pub fn buffer_read(&self, addr: usize, out: &mut [u8]) {
        assert!(
            addr + out.len() <= self.buf.len(),
            "buffer read {}..{} past page size {}",
            addr,
            addr + out.len(),
            self.buf.len()
        );
        out.copy_from_slice(&self.buf[addr..addr + out.len()]);
    }

    /// Copy bytes into the buffer and mark it dirty.
    ///
    /// # Panics
    /// Panics if the range runs past the end of the page.
    pub fn buffer_write(&mut self, addr: usize, data: &[u8]) {
        assert!(
            addr + data.len() <= self.buf.len(),
            "buffer write {}..{} past page size {}",
            addr,
            addr + data.len(),
            self.buf.len()
        );
        self.buf[addr..addr + data.len()].copy_from_slice(data);
        self.dirty = true;
    }

    #[must_use]
    pub fn header(&self) -> PageHeader {
        let mut raw = [0u8; HEADER_LEN];
        self.buffer_read(self.header_offset(), &mut raw);
        PageHeader::decode(&raw)
    }

    pub fn set_header(&mut self, hdr: &PageHeader) {
        let off = self.header_offset();
        self.buffer_write(off, &hdr.encode());
    }

    /// Point the buffer at a freshly allocated copy of the cached page. `superseded` is the
    /// physical page the data came from.
    ///
    /// # Panics
    /// Panics if nothing is cached or if an unflushed copy-on-write is pending.
    pub fn retarget(&mut self, page: PageId, superseded: PageId) {
        assert!(self.page.is_some(), "retarget without a cached page");
        assert!(
            self.superseded.is_none(),
            "retarget while page {:?} awaits release",
            self.superseded
        );
        self.page = Some(page);
        self.superseded = Some(superseded);
        self.dirty = true;
    }

    /// Start a brand new page holding only `hdr`. The current page must be flushed.
    ///
    /// # Panics
    /// Panics if the current page is dirty.
    pub fn reset(&mut self, page: PageId, hdr: &PageHeader) {
        assert!(!self.dirty, "reset would drop unflushed page {:?}", self.page);
        self.buf.fill(ERASED_BYTE);
        self.page = Some(page);
        self.superseded = None;
        self.set_header(hdr);
    }

    /// Forget the cached page without writing it back.
    pub fn invalidate(&mut self) {
        self.page = None;
        self.dirty = false;
        self.superseded = None;
    }

    fn header_offset(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }
}
