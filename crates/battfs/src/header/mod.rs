//! On-disk page footer codec.
//!
//! Every physical page ends with a 12 byte little-endian footer:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 1    | inode |
//! | 1      | 2    | fill  |
//! | 3      | 2    | pgoff |
//! | 5      | 5    | seq   |
//! | 10     | 2    | fcs   |
//!
//! `fcs` is a rotating hash over the first ten bytes.

#[cfg(test)]
mod header_tests;

use crate::{Fill, Inode, PgOff, Seq};

/// HEADER_LEN is the size of the footer stored at the end of each page.
pub const HEADER_LEN: usize = 12;
/// Bytes covered by the checksum (everything but the fcs itself).
pub const FCS_COVERED_LEN: usize = HEADER_LEN - 2;
/// Largest value representable by the 40-bit sequence field.
pub const SEQ_MAX: Seq = (1 << 40) - 1;

const ROTATING_INIT: u16 = 0;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default)]
/// PageHeader describes which file a physical page belongs to and which version it holds.
pub struct PageHeader {
    pub inode: Inode,
    pub fill: Fill,
    pub pgoff: PgOff,
    pub seq: Seq,
    pub fcs: u16,
}

impl PageHeader {
    #[must_use]
    /// `new` builds a header and stamps it with a matching checksum.
    ///
    /// # Arguments
    /// * `inode` - Owning file.
    /// * `fill` - Valid payload bytes in the page.
    /// * `pgoff` - Position of the page within the file.
    /// * `seq` - Version counter, truncated to 40 bits.
    pub fn new(inode: Inode, fill: Fill, pgoff: PgOff, seq: Seq) -> Self {
        let mut hdr = Self {
            inode,
            fill,
            pgoff,
            seq: seq & SEQ_MAX,
            fcs: 0,
        };
        hdr.stamp();
        hdr
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.inode;
        out[1..3].copy_from_slice(&self.fill.to_le_bytes());
        out[3..5].copy_from_slice(&self.pgoff.to_le_bytes());
        out[5..10].copy_from_slice(&self.seq.to_le_bytes()[..5]);
        out[10..12].copy_from_slice(&self.fcs.to_le_bytes());
        out
    }

    #[must_use]
    pub fn decode(raw: &[u8; HEADER_LEN]) -> Self {
        let mut seq = [0u8; 8];
        seq[..5].copy_from_slice(&raw[5..10]);
        Self {
            inode: raw[0],
            fill: u16::from_le_bytes([raw[1], raw[2]]),
            pgoff: u16::from_le_bytes([raw[3], raw[4]]),
            seq: u64::from_le_bytes(seq),
            fcs: u16::from_le_bytes([raw[10], raw[11]]),
        }
    }

    #[must_use]
    /// `checksum` folds the rotating hash over every serialized field except `fcs`.
    pub fn checksum(&self) -> u16 {
        rotating_hash(&self.encode()[..FCS_COVERED_LEN])
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.fcs == self.checksum()
    }

    /// `stamp` recomputes `fcs` after a field has been changed.
    pub fn stamp(&mut self) {
        self.fcs = self.checksum();
    }
}

/// 16-bit rotating hash: rotate left by four, then xor in the next byte.
#[must_use]
pub fn rotating_hash(data: &[u8]) -> u16 {
    data.iter()
        .fold(ROTATING_INIT, |acc, &b| acc.rotate_left(4) ^ u16::from(b))
}
