//! Mount-time recovery scan.
//!
//! Rebuilds the page allocation array from the footers of every physical page. Pass one
//! counts the usable pages of each inode, pass two drops each page into the slot derived
//! from those counts and settles duplicates of the same `(inode, pgoff)` by sequence number.
//! Every page the scan frees is erased before it joins the free list.


use std::ops::Range;

use tracing::{debug, warn};

use crate::device::{FlashDevice, Geometry};
use crate::error::{BattFsError, Result};
use crate::header::{HEADER_LEN, PageHeader, SEQ_MAX};
use crate::metrics::{self, FlashOpKind};
use crate::{Inode, PageId, Seq};

/// Size of the flat inode namespace.
pub const INODE_COUNT: usize = 1 << Inode::BITS;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Pages with a usable footer.
    pub valid: usize,
    /// Stale duplicates and out-of-range pages reclaimed during placement.
    pub evicted: usize,
    /// Pages dropped because an earlier page of the same file is missing.
    pub truncated: usize,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Allocation array: a permutation of every physical page.
    pub pages: Vec<PageId>,
    pub free_page_start: usize,
    pub free_bytes: u64,
    /// Sequence number to stamp on the next page written.
    pub next_seq: Seq,
    pub stats: ScanStats,
}

/// Read the footer of `page` straight from the device.
///
/// # Errors
/// Returns an error if the device read fails or comes back short.
pub fn read_footer<D: FlashDevice>(
    dev: &mut D,
    geom: &Geometry,
    page: PageId,
) -> Result<PageHeader> {
    let mut raw = [0u8; HEADER_LEN];
    let res = dev.read(page, geom.header_offset(), &mut raw);
    metrics::record(page, FlashOpKind::Read, HEADER_LEN, &res);
    let got = res?;
    if got != HEADER_LEN {
        return Err(BattFsError::ShortRead {
            page,
            expected: HEADER_LEN,
            got,
        });
    }
    Ok(PageHeader::decode(&raw))
}

fn erase_reclaimed<D: FlashDevice>(dev: &mut D, geom: &Geometry, page: PageId) -> Result<()> {
    let res = dev.erase(page);
    metrics::record(page, FlashOpKind::Erase, geom.page_size, &res);
    Ok(res?)
}

/// A footer is usable when its checksum holds and its fill fits the payload area.
#[must_use]
pub fn is_usable(hdr: &PageHeader, geom: &Geometry) -> bool {
    hdr.is_valid() && usize::from(hdr.fill) <= geom.payload_capacity()
}

/// Per-inode slot ranges over the allocated prefix, valid for one scan only.
struct SlotArena {
    slots: Vec<Option<PageId>>,
    counts: [usize; INODE_COUNT],
}

impl SlotArena {
    fn new(counts: [usize; INODE_COUNT]) -> Self {
        let total = counts.iter().sum();
        Self {
            slots: vec![None; total],
            counts,
        }
    }

    fn range(&self, inode: Inode) -> Range<usize> {
        let i = usize::from(inode);
        let base: usize = self.counts[..i].iter().sum();
        base..base + self.counts[i]
    }

    /// Shrink `inode`'s range by its last slot, shifting every later slot left.
    ///
    /// Pre: one page counted for `inode` is being discarded, so the range is not empty.
    /// Post: `counts[inode]` is one smaller, every other slot keeps its relative order, and
    /// the page that sat in the dropped slot (if any) is returned: it now lies past the end
    /// of the file and must be reclaimed too. With densely numbered pages the dropped slot
    /// is always unset.
    fn remove_and_compact(&mut self, inode: Inode) -> Result<Option<PageId>> {
        let range = self.range(inode);
        if range.is_empty() {
            return Err(BattFsError::Corrupt(format!(
                "inode {inode} has no slot left to compact"
            )));
        }
        self.counts[usize::from(inode)] -= 1;
        Ok(self.slots.remove(range.end - 1))
    }
}

/// Free-list side of pass two.
struct Reclaimer {
    free: Vec<PageId>,
    free_bytes: u64,
    evicted: usize,
}

impl Reclaimer {
    /// Erase `page` and hand it to the free list. Its footer must not survive, or a later
    /// scan would count it for its inode again.
    fn reclaim<D: FlashDevice>(
        &mut self,
        dev: &mut D,
        geom: &Geometry,
        page: PageId,
        fill: u16,
    ) -> Result<()> {
        erase_reclaimed(dev, geom, page)?;
        self.free.push(page);
        self.free_bytes += u64::from(fill);
        self.evicted += 1;
        Ok(())
    }

    /// Drop one slot of `inode` and reclaim the page it displaced, if any.
    fn compact<D: FlashDevice>(
        &mut self,
        arena: &mut SlotArena,
        dev: &mut D,
        geom: &Geometry,
        inode: Inode,
    ) -> Result<()> {
        if let Some(displaced) = arena.remove_and_compact(inode)? {
            let hdr = read_footer(dev, geom, displaced)?;
            warn!(page = displaced, inode, "page pushed past end of file, reclaiming");
            self.reclaim(dev, geom, displaced, hdr.fill)?;
        }
        Ok(())
    }
}

/// Scan every page of the device and build the allocation index.
///
/// # Errors
/// Returns an error if the geometry is unusable, any footer read fails, or a reclaimed page
/// cannot be erased.
pub fn scan<D: FlashDevice>(dev: &mut D, geom: &Geometry) -> Result<ScanOutcome> {
    geom.validate()?;
    let page_count = PageId::try_from(geom.page_count - 1)
        .map_err(|_| BattFsError::InvalidGeometry(format!("{} pages", geom.page_count)))?;
    let payload = geom.payload_capacity() as u64;

    // Pass 1: count.
    let mut counts = [0usize; INODE_COUNT];
    let mut free_bytes = payload * geom.page_count as u64;
    let mut max_seq: Option<Seq> = None;
    let mut stats = ScanStats::default();

    for page in 0..=page_count {
        let hdr = read_footer(dev, geom, page)?;
        if !is_usable(&hdr, geom) {
            continue;
        }
        counts[usize::from(hdr.inode)] += 1;
        free_bytes -= u64::from(hdr.fill);
        max_seq = Some(max_seq.map_or(hdr.seq, |m| m.max(hdr.seq)));
        stats.valid += 1;
    }

    // Pass 2: place.
    let mut arena = SlotArena::new(counts);
    let mut rec = Reclaimer {
        free: Vec::with_capacity(geom.page_count - stats.valid),
        free_bytes,
        evicted: 0,
    };

    for page in 0..=page_count {
        let hdr = read_footer(dev, geom, page)?;
        if !is_usable(&hdr, geom) {
            rec.free.push(page);
            continue;
        }

        let range = arena.range(hdr.inode);
        let pgoff = usize::from(hdr.pgoff);
        if pgoff >= range.len() {
            warn!(
                page,
                inode = hdr.inode,
                pgoff,
                "page offset beyond file length, reclaiming"
            );
            rec.compact(&mut arena, dev, geom, hdr.inode)?;
            rec.reclaim(dev, geom, page, hdr.fill)?;
            continue;
        }

        let slot = range.start + pgoff;
        let Some(placed) = arena.slots[slot] else {
            arena.slots[slot] = Some(page);
            continue;
        };

        let placed_hdr = read_footer(dev, geom, placed)?;
        let (winner, loser, loser_fill) = if hdr.seq > placed_hdr.seq {
            (page, placed, placed_hdr.fill)
        } else {
            (placed, page, hdr.fill)
        };
        debug!(
            inode = hdr.inode,
            pgoff, winner, loser, "duplicate page, keeping newest copy"
        );
        arena.slots[slot] = Some(winner);
        rec.compact(&mut arena, dev, geom, hdr.inode)?;
        rec.reclaim(dev, geom, loser, loser_fill)?;
    }
    stats.evicted = rec.evicted;
    let Reclaimer {
        mut free,
        mut free_bytes,
        ..
    } = rec;

    // A file with a missing page ends right before the gap.
    let mut pages: Vec<PageId> = Vec::with_capacity(geom.page_count);
    for inode in 0..=Inode::MAX {
        let run = &arena.slots[arena.range(inode)];
        let live = run.iter().take_while(|s| s.is_some()).count();
        pages.extend(run[..live].iter().flatten());

        let orphans: Vec<PageId> = run[live..].iter().flatten().copied().collect();
        if !orphans.is_empty() {
            warn!(
                inode,
                kept = live,
                dropped = orphans.len(),
                "file has a missing page, truncating"
            );
        }
        for orphan in orphans {
            let hdr = read_footer(dev, geom, orphan)?;
            erase_reclaimed(dev, geom, orphan)?;
            free_bytes += u64::from(hdr.fill);
            free.push(orphan);
            stats.truncated += 1;
        }
    }

    let free_page_start = pages.len();
    pages.extend(free);
    debug_assert_eq!(pages.len(), geom.page_count);

    Ok(ScanOutcome {
        pages,
        free_page_start,
        free_bytes,
        next_seq: max_seq.map_or(0, |m| (m + 1).min(SEQ_MAX)),
        stats,
    })
}
