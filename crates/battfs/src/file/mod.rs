//! File handles and byte-level I/O over a file's chain of pages.


use std::fmt;
use std::io::SeekFrom;

use bitflags::bitflags;
use tracing::debug;

use crate::Inode;
use crate::device::FlashDevice;
use crate::disk::BattFs;
use crate::error::{BattFsError, Result};
use crate::header::PageHeader;

bitflags! {
    /// Open mode flags, combinable.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenMode: u8 {
        /// Create the file if it does not exist.
        const CREATE = 0x01;
        const RD = 0x02;
        const WR = 0x04;
    }
}

/// Opaque id of an open file, valid until it is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(u32);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenFile {
    handle: FileHandle,
    inode: Inode,
    mode: OpenMode,
    /// Slot of the first page in the allocation array.
    start: usize,
    pages: usize,
    size: u64,
    seek_pos: u64,
}

impl OpenFile {
    #[must_use]
    pub const fn handle(&self) -> FileHandle {
        self.handle
    }

    #[must_use]
    pub const fn inode(&self) -> Inode {
        self.inode
    }

    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn seek_pos(&self) -> u64 {
        self.seek_pos
    }
}

impl<D: FlashDevice> BattFs<D> {
    /// `file_open` opens `inode`, creating an empty file when `CREATE` is given and the
    /// file does not exist yet. A created file is durable before this returns.
    ///
    /// # Errors
    /// * [`BattFsError::NotFound`] if the file is absent and `CREATE` is not set.
    /// * [`BattFsError::OutOfSpace`] if creation needs a page and none is free.
    /// * Device errors from the lookup or from committing the new file.
    pub fn file_open(&mut self, inode: Inode, mode: OpenMode) -> Result<FileHandle> {
        let start = match self.find_file(inode)? {
            Some(start) => start,
            None if mode.contains(OpenMode::CREATE) => self.create_file(inode)?,
            None => return Err(BattFsError::NotFound(inode)),
        };
        let extent = self.file_extent(start)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        let pos = self.files.partition_point(|f| f.inode <= inode);
        self.files.insert(
            pos,
            OpenFile {
                handle,
                inode,
                mode,
                start,
                pages: extent.pages,
                size: extent.size,
                seek_pos: 0,
            },
        );
        debug!(%handle, inode, size = extent.size, "file opened");
        Ok(handle)
    }

    /// Flush the page cache and forget `handle`. Pages are not reclaimed.
    ///
    /// # Errors
    /// Returns [`BattFsError::BadHandle`] for an unknown handle, or the flush error; the
    /// handle stays open if the flush fails.
    pub fn file_close(&mut self, handle: FileHandle) -> Result<()> {
        let idx = self.file_index(handle)?;
        self.flush()?;
        self.files.remove(idx);
        debug!(%handle, "file closed");
        Ok(())
    }

    /// Open files, ordered by inode.
    #[must_use]
    pub fn open_files(&self) -> &[OpenFile] {
        &self.files
    }

    /// # Errors
    /// Returns [`BattFsError::BadHandle`] for an unknown handle.
    pub fn file(&self, handle: FileHandle) -> Result<&OpenFile> {
        Ok(&self.files[self.file_index(handle)?])
    }

    /// # Errors
    /// Returns [`BattFsError::BadHandle`] for an unknown handle.
    pub fn file_size(&self, handle: FileHandle) -> Result<u64> {
        Ok(self.file(handle)?.size)
    }

    /// # Errors
    /// Returns [`BattFsError::BadHandle`] for an unknown handle.
    pub fn tell(&self, handle: FileHandle) -> Result<u64> {
        Ok(self.file(handle)?.seek_pos)
    }

    /// Move the cursor. Positions past the end are allowed; a later write fills the gap
    /// with zeros.
    ///
    /// # Errors
    /// Returns [`BattFsError::InvalidSeek`] if the target is negative.
    pub fn seek(&mut self, handle: FileHandle, to: SeekFrom) -> Result<u64> {
        let idx = self.file_index(handle)?;
        let file = &mut self.files[idx];
        let (base, delta) = match to {
            SeekFrom::Start(n) => (n, 0),
            SeekFrom::End(d) => (file.size, d),
            SeekFrom::Current(d) => (file.seek_pos, d),
        };
        let target = base
            .checked_add_signed(delta)
            .ok_or(BattFsError::InvalidSeek(delta))?;
        file.seek_pos = target;
        Ok(target)
    }

    /// `read` copies up to `buf.len()` bytes from the cursor, never past the end of the
    /// file, and advances the cursor by the count returned.
    ///
    /// # Errors
    /// Returns [`BattFsError::NotReadable`] without `RD`, or a device error.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let idx = self.file_index(handle)?;
        let file = &self.files[idx];
        if !file.mode.contains(OpenMode::RD) {
            return Err(BattFsError::NotReadable);
        }
        let avail = file.size.saturating_sub(file.seek_pos);
        let len = buf.len().min(usize::try_from(avail).unwrap_or(usize::MAX));
        let cap = self.geom.payload_capacity();

        let mut done = 0;
        while done < len {
            let (start, pos) = (self.files[idx].start, self.files[idx].seek_pos);
            let (pgoff, addr) = split_pos(pos, cap);
            let chunk = (len - done).min(cap - addr);

            let page = self.page_at(start + pgoff)?;
            self.load_page(page)?;
            self.cache.buffer_read(addr, &mut buf[done..done + chunk]);

            self.files[idx].seek_pos += chunk as u64;
            done += chunk;
        }
        Ok(done)
    }

    /// `write` stores `data` at the cursor, growing the file as needed, and advances the
    /// cursor by the count returned.
    ///
    /// Each touched page is rewritten copy-on-write: the payload goes to a fresh page
    /// stamped with a newer sequence number, and the old copy is erased only after the new
    /// one has been saved. Data stays in the page cache until the next page switch,
    /// [`flush`](Self::flush), [`file_close`](Self::file_close) or unmount.
    ///
    /// # Errors
    /// * [`BattFsError::NotWritable`] without `WR`.
    /// * [`BattFsError::OutOfSpace`] if no free page is left before any byte was written;
    ///   once some bytes are in, the short count is returned instead. A gap in front of the
    ///   cursor is only filled when it and the first byte of `data` fit, so a refused write
    ///   leaves the file untouched.
    /// * Device errors.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let idx = self.file_index(handle)?;
        let file = &self.files[idx];
        if !file.mode.contains(OpenMode::WR) {
            return Err(BattFsError::NotWritable);
        }
        if data.is_empty() {
            return Ok(0);
        }

        if file.seek_pos > file.size {
            let (target, size) = (file.seek_pos, file.size);
            self.reserve_gap(idx, target)?;
            self.files[idx].seek_pos = size;
            self.fill_gap(idx, target - size)?;
        }
        self.write_at_cursor(idx, data)
    }

    /// Fail with `OutOfSpace` unless every page needed to reach byte `target` can be
    /// allocated, counting the one a rewrite of a partial last page borrows.
    fn reserve_gap(&self, idx: usize, target: u64) -> Result<()> {
        let file = &self.files[idx];
        let cap = self.geom.payload_capacity() as u64;
        let needed = usize::try_from(target / cap + 1).map_err(|_| BattFsError::OutOfSpace)?;
        let grow = needed.saturating_sub(file.pages);

        let last = self.page_at(file.start + file.pages.saturating_sub(1))?;
        let partial = file.size < file.pages as u64 * cap;
        let rewritten = self.cache.page() == Some(last) && self.cache.is_dirty();
        let borrow = usize::from(partial && !rewritten);

        let free = self.pages.len() - self.free_page_start;
        if free < grow.max(borrow) {
            debug!(inode = file.inode, target, free, grow, "gap does not fit");
            return Err(BattFsError::OutOfSpace);
        }
        Ok(())
    }

    fn fill_gap(&mut self, idx: usize, mut gap: u64) -> Result<()> {
        let zeros = vec![0u8; self.geom.payload_capacity()];
        while gap > 0 {
            let n = zeros.len().min(usize::try_from(gap).unwrap_or(usize::MAX));
            if self.write_at_cursor(idx, &zeros[..n])? < n {
                return Err(BattFsError::OutOfSpace);
            }
            gap -= n as u64;
        }
        Ok(())
    }

    fn write_at_cursor(&mut self, idx: usize, data: &[u8]) -> Result<usize> {
        let cap = self.geom.payload_capacity();
        let inode = self.files[idx].inode;

        let mut written = 0;
        while written < data.len() {
            let (pgoff, addr) = split_pos(self.files[idx].seek_pos, cap);
            let chunk = (data.len() - written).min(cap - addr);

            match self.prepare_write_page(idx, pgoff) {
                Ok(()) => {}
                Err(BattFsError::OutOfSpace) if written > 0 => break,
                Err(err) => return Err(err),
            }
            self.cache.buffer_write(addr, &data[written..written + chunk]);

            let mut hdr = self.cache.header();
            let end = u16::try_from(addr + chunk).map_err(|_| {
                BattFsError::Corrupt(format!("fill {} overflows a page", addr + chunk))
            })?;
            if end > hdr.fill {
                let grown = u64::from(end - hdr.fill);
                hdr.fill = end;
                hdr.stamp();
                self.cache.set_header(&hdr);
                self.free_bytes -= grown;
                for f in self.files.iter_mut().filter(|f| f.inode == inode) {
                    f.size += grown;
                }
            }

            self.files[idx].seek_pos += chunk as u64;
            written += chunk;
        }
        Ok(written)
    }

    /// Leave the cache holding a private, dirty copy of logical page `pgoff` of the file,
    /// allocating the page when the file is being extended.
    fn prepare_write_page(&mut self, idx: usize, pgoff: usize) -> Result<()> {
        let OpenFile {
            inode,
            start,
            pages,
            ..
        } = self.files[idx];
        let slot = start + pgoff;

        if pgoff < pages {
            let current = self.page_at(slot)?;
            if self.cache.page() == Some(current) && self.cache.is_dirty() {
                return Ok(());
            }
            self.load_page(current)?;
            let (new, old) = self.replace_slot(slot)?;
            let mut hdr = self.cache.header();
            hdr.seq = self.bump_seq();
            hdr.stamp();
            self.cache.retarget(new, old);
            self.cache.set_header(&hdr);
            return Ok(());
        }

        debug_assert_eq!(pgoff, pages, "files grow one page at a time");
        let pgoff = u16::try_from(pgoff).map_err(|_| BattFsError::OutOfSpace)?;
        self.flush()?;
        let new = self.insert_slot(slot)?;
        self.shift_files_after(inode);
        for f in self.files.iter_mut().filter(|f| f.inode == inode) {
            f.pages += 1;
        }
        let hdr = PageHeader::new(inode, 0, pgoff, self.bump_seq());
        self.cache.reset(new, &hdr);
        Ok(())
    }

    /// Allocate and commit the first, empty page of a new file. If the commit fails the page
    /// goes back to the free list and the disk is left as it was.
    fn create_file(&mut self, inode: Inode) -> Result<usize> {
        self.flush()?;
        let slot = self.insertion_slot(inode)?;
        let new = self.insert_slot(slot)?;
        let hdr = PageHeader::new(inode, 0, 0, self.bump_seq());
        self.cache.reset(new, &hdr);
        if let Err(err) = self.flush() {
            self.cache.invalidate();
            self.release_slot(slot)?;
            return Err(err);
        }
        self.shift_files_after(inode);
        debug!(inode, page = new, slot, "file created");
        Ok(slot)
    }

    /// A page was inserted at the end of `inode`'s run: every later file moves up a slot.
    fn shift_files_after(&mut self, inode: Inode) {
        for f in self.files.iter_mut().filter(|f| f.inode > inode) {
            f.start += 1;
        }
    }

    fn file_index(&self, handle: FileHandle) -> Result<usize> {
        self.files
            .iter()
            .position(|f| f.handle == handle)
            .ok_or(BattFsError::BadHandle(handle))
    }
}

/// Split a byte offset into (page offset within the file, byte offset within the page).
fn split_pos(pos: u64, cap: usize) -> (usize, usize) {
    let cap = cap as u64;
    ((pos / cap) as usize, (pos % cap) as usize)
}
