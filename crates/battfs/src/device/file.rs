use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::{ERASED_BYTE, FlashDevice, Geometry, page_range};
use crate::PageId;

/// FileFlash emulates a flash part with a memory-mapped image file.
pub struct FileFlash {
    path: PathBuf,
    file: Option<File>,
    map: Option<MmapMut>,
    geom: Geometry,
    /// True when the image was created (or was empty) and has been erased on open.
    pub freshly_erased: bool,
}

impl FileFlash {
    /// Open an image file, creating and erasing it when it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the image cannot be created/opened or mapped.
    pub fn open_prealloc(path: impl AsRef<Path>, geom: Geometry) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let prev_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let len = geom.raw_len();
        if existed && prev_len != 0 && prev_len != len {
            anyhow::bail!(
                "image {} is {prev_len} bytes, geometry expects {len}",
                path.display()
            );
        }
        file.set_len(len)?;

        let map_len = usize::try_from(len)
            .map_err(|_| anyhow::anyhow!("image length {len} exceeds addressable size"))?;
        let mut map = unsafe { MmapOptions::new().len(map_len).map_mut(&file)? };

        let freshly_erased = !existed || prev_len == 0;
        if freshly_erased {
            map.fill(ERASED_BYTE);
            map.flush()?;
        }

        Ok(Self {
            path,
            file: Some(file),
            map: Some(map),
            geom,
            freshly_erased,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geom
    }

    #[must_use]
    pub const fn is_operational(&self) -> bool {
        self.file.is_some() && self.map.is_some()
    }

    /// Erase every page of the image.
    ///
    /// # Errors
    /// Returns an error if the image has been closed or cannot be flushed.
    pub fn format(&mut self) -> io::Result<()> {
        let map = self.map_mut()?;
        map.fill(ERASED_BYTE);
        map.flush()
    }

    fn map_ref(&self) -> io::Result<&MmapMut> {
        self.map
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "image is closed"))
    }

    fn map_mut(&mut self) -> io::Result<&mut MmapMut> {
        self.map
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "image is closed"))
    }
}

impl FlashDevice for FileFlash {
    fn open(&mut self) -> io::Result<Geometry> {
        self.map_ref()?;
        Ok(self.geom)
    }

    fn read(&mut self, page: PageId, addr: usize, buf: &mut [u8]) -> io::Result<usize> {
        let range = page_range(&self.geom, page)?;
        let map = self.map_ref()?;
        if addr >= self.geom.page_size {
            return Ok(0);
        }
        let start = range.start + addr;
        let end = start.saturating_add(buf.len()).min(range.end);
        let src = &map[start..end];
        let n = src.len();
        buf[..n].copy_from_slice(src);
        Ok(n)
    }

    fn load(&mut self, page: PageId, buf: &mut [u8]) -> io::Result<()> {
        let range = page_range(&self.geom, page)?;
        let map = self.map_ref()?;
        buf.copy_from_slice(&map[range]);
        Ok(())
    }

    fn save(&mut self, page: PageId, buf: &[u8]) -> io::Result<()> {
        let range = page_range(&self.geom, page)?;
        let map = self.map_mut()?;
        map[range].copy_from_slice(buf);
        // Flushing is left to close(); the OS page cache keeps the image coherent meanwhile.
        Ok(())
    }

    fn erase(&mut self, page: PageId) -> io::Result<()> {
        let range = page_range(&self.geom, page)?;
        let map = self.map_mut()?;
        map[range].fill(ERASED_BYTE);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.take();
        Ok(())
    }
}
