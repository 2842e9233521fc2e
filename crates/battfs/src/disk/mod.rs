//! Mounted disk state: allocation array, free space accounting and file lookup.


use tracing::{debug, info};

use crate::cache::PageCache;
use crate::device::{FlashDevice, Geometry};
use crate::error::{BattFsError, Result};
use crate::file::OpenFile;
use crate::header::{PageHeader, SEQ_MAX};
use crate::scan::{self, ScanStats};
use crate::{Inode, PageId, Seq};

/// Pages and payload bytes of one file, derived from its page footers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileExtent {
    pub pages: usize,
    pub size: u64,
}

/// BattFs is one mounted disk. It owns the device, the page allocation array and the
/// single page cache for the whole mount.
///
/// The allocation array holds every physical page exactly once. Slots
/// `[0, free_page_start)` are the pages of all files, ordered by inode and then by page
/// offset; the remaining slots are free pages, handed out front first.
pub struct BattFs<D: FlashDevice> {
    pub(crate) device: D,
    pub(crate) geom: Geometry,
    pub(crate) pages: Vec<PageId>,
    pub(crate) free_page_start: usize,
    pub(crate) disk_size: u64,
    pub(crate) free_bytes: u64,
    pub(crate) next_seq: Seq,
    pub(crate) cache: PageCache,
    pub(crate) files: Vec<OpenFile>,
    pub(crate) next_handle: u32,
    scan_stats: ScanStats,
}

impl<D: FlashDevice> BattFs<D> {
    /// Open the device and rebuild the allocation index from its pages.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened, reports an unusable geometry, or
    /// fails while the pages are scanned.
    pub fn mount(mut device: D) -> Result<Self> {
        let geom = device.open()?;
        geom.validate()?;

        let outcome = scan::scan(&mut device, &geom)?;
        let disk_size = geom.payload_capacity() as u64 * geom.page_count as u64;
        info!(
            page_size = geom.page_size,
            page_count = geom.page_count,
            used_pages = outcome.free_page_start,
            free_bytes = outcome.free_bytes,
            evicted = outcome.stats.evicted,
            truncated = outcome.stats.truncated,
            "battfs mounted"
        );

        Ok(Self {
            cache: PageCache::new(&geom),
            device,
            geom,
            pages: outcome.pages,
            free_page_start: outcome.free_page_start,
            disk_size,
            free_bytes: outcome.free_bytes,
            next_seq: outcome.next_seq,
            files: Vec::new(),
            next_handle: 0,
            scan_stats: outcome.stats,
        })
    }

    /// Flush the cache, forget every open file and close the device, handing it back.
    ///
    /// # Errors
    /// Returns an error if the final flush or the device close fails; the device is
    /// dropped in that case.
    pub fn unmount(mut self) -> Result<D> {
        let flushed = self.cache.flush(&mut self.device);
        self.files.clear();
        let closed = self.device.close();
        flushed?;
        closed?;
        info!(free_bytes = self.free_bytes, "battfs unmounted");
        Ok(self.device)
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geom
    }

    /// The allocation array: every physical page, used pages first.
    #[must_use]
    pub fn page_array(&self) -> &[PageId] {
        &self.pages
    }

    #[must_use]
    pub const fn free_page_start(&self) -> usize {
        self.free_page_start
    }

    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Payload capacity of the whole disk.
    #[must_use]
    pub const fn disk_size(&self) -> u64 {
        self.disk_size
    }

    #[must_use]
    pub const fn scan_stats(&self) -> &ScanStats {
        &self.scan_stats
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    pub const fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Write the cached page back if it is dirty.
    ///
    /// # Errors
    /// Returns an error if the device rejects the erase or program.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush(&mut self.device)
    }

    pub(crate) fn load_page(&mut self, page: PageId) -> Result<()> {
        self.cache.load(&mut self.device, page)
    }

    /// Footer of a physical page. The cached copy wins over the medium, so pages not yet
    /// written back are seen as they will be saved.
    ///
    /// # Errors
    /// Returns an error if the device read fails or is short.
    pub fn read_header(&mut self, page: PageId) -> Result<PageHeader> {
        if self.cache.page() == Some(page) {
            return Ok(self.cache.header());
        }
        scan::read_footer(&mut self.device, &self.geom, page)
    }

    /// Bounds-checked access to a used slot of the allocation array.
    pub(crate) fn page_at(&self, slot: usize) -> Result<PageId> {
        if slot >= self.free_page_start {
            return Err(BattFsError::Corrupt(format!(
                "slot {slot} outside used region 0..{}",
                self.free_page_start
            )));
        }
        Ok(self.pages[slot])
    }

    /// `find_file` binary-searches the used region for `inode` and returns the slot of its
    /// first page.
    ///
    /// # Errors
    /// Returns an error if a footer cannot be read or points before the start of the array.
    pub fn find_file(&mut self, inode: Inode) -> Result<Option<usize>> {
        let (mut first, mut last) = (0, self.free_page_start);
        while first < last {
            let mid = first + (last - first) / 2;
            let hdr = self.read_header(self.pages[mid])?;
            let valid = hdr.is_valid();
            if valid && hdr.inode == inode {
                let start = mid.checked_sub(usize::from(hdr.pgoff)).ok_or_else(|| {
                    BattFsError::Corrupt(format!(
                        "page offset {} at slot {mid} precedes the array",
                        hdr.pgoff
                    ))
                })?;
                return Ok(Some(start));
            } else if valid && hdr.inode < inode {
                first = mid + 1;
            } else {
                last = mid;
            }
        }
        Ok(None)
    }

    /// # Errors
    /// Returns an error if a footer cannot be read.
    pub fn file_exists(&mut self, inode: Inode) -> Result<bool> {
        Ok(self.find_file(inode)?.is_some())
    }

    /// `count_file_size` sums `fill` over the run of pages starting at `start` that carry
    /// the same inode.
    ///
    /// # Errors
    /// Returns an error if a footer cannot be read.
    pub fn count_file_size(&mut self, start: usize) -> Result<u64> {
        Ok(self.file_extent(start)?.size)
    }

    pub(crate) fn file_extent(&mut self, start: usize) -> Result<FileExtent> {
        let mut extent = FileExtent::default();
        let mut owner: Option<Inode> = None;
        for slot in start..self.free_page_start {
            let hdr = self.read_header(self.pages[slot])?;
            if !hdr.is_valid() || owner.is_some_and(|inode| inode != hdr.inode) {
                break;
            }
            owner = Some(hdr.inode);
            extent.pages += 1;
            extent.size += u64::from(hdr.fill);
        }
        Ok(extent)
    }

    /// Slot at which a file for `inode` would start if it were created now.
    pub(crate) fn insertion_slot(&mut self, inode: Inode) -> Result<usize> {
        let (mut first, mut last) = (0, self.free_page_start);
        while first < last {
            let mid = first + (last - first) / 2;
            let hdr = self.read_header(self.pages[mid])?;
            if hdr.is_valid() && hdr.inode <= inode {
                first = mid + 1;
            } else {
                last = mid;
            }
        }
        Ok(first)
    }

    /// Move the first free page into the used region at `slot`.
    pub(crate) fn insert_slot(&mut self, slot: usize) -> Result<PageId> {
        if self.free_page_start >= self.pages.len() {
            return Err(BattFsError::OutOfSpace);
        }
        debug_assert!(slot <= self.free_page_start);
        let page = self.pages.remove(self.free_page_start);
        self.pages.insert(slot, page);
        self.free_page_start += 1;
        debug!(page, slot, "allocated page");
        Ok(page)
    }

    /// Undo [`insert_slot`](Self::insert_slot): the page at `slot` returns to the front of the
    /// free region.
    pub(crate) fn release_slot(&mut self, slot: usize) -> Result<PageId> {
        self.page_at(slot)?;
        let page = self.pages.remove(slot);
        self.free_page_start -= 1;
        self.pages.insert(self.free_page_start, page);
        debug!(page, slot, "released page");
        Ok(page)
    }

    /// Swap the page in used `slot` for the first free page. The old page goes to the back
    /// of the free region. Returns `(new, old)`.
    pub(crate) fn replace_slot(&mut self, slot: usize) -> Result<(PageId, PageId)> {
        if self.free_page_start >= self.pages.len() {
            return Err(BattFsError::OutOfSpace);
        }
        self.page_at(slot)?;
        let new = self.pages.remove(self.free_page_start);
        let old = std::mem::replace(&mut self.pages[slot], new);
        self.pages.push(old);
        debug!(new, old, slot, "copy-on-write");
        Ok((new, old))
    }

    pub(crate) fn bump_seq(&mut self) -> Seq {
        let seq = self.next_seq;
        assert!(seq <= SEQ_MAX, "page sequence counter exhausted");
        self.next_seq += 1;
        seq
    }
}
