//! Fixtures shared by the unit tests.

use crate::PageId;
use crate::device::RamFlash;
use crate::header::{HEADER_LEN, PageHeader};

pub const PAGE_SIZE: usize = 128;
pub const PAYLOAD: usize = PAGE_SIZE - HEADER_LEN;

pub fn erased_flash(page_count: usize) -> RamFlash {
    RamFlash::new(PAGE_SIZE, page_count)
}

/// Program a full page: `payload` at the front, `hdr` in the footer.
pub fn write_page(flash: &mut RamFlash, page: PageId, hdr: &PageHeader, payload: &[u8]) {
    assert!(payload.len() <= PAYLOAD);
    let mut raw = vec![0xFFu8; PAGE_SIZE];
    raw[..payload.len()].copy_from_slice(payload);
    raw[PAYLOAD..].copy_from_slice(&hdr.encode());
    flash.program_raw(page, &raw);
}

/// Deterministic payload so every (inode, pgoff) pair is distinguishable.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_mul(31).wrapping_add(u8::try_from(i % 251).unwrap_or(0)))
        .collect()
}

pub fn footer(flash: &RamFlash, page: PageId) -> PageHeader {
    let raw: [u8; HEADER_LEN] = flash.page(page)[PAYLOAD..].try_into().unwrap();
    PageHeader::decode(&raw)
}
