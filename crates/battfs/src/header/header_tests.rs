use super::*;

#[test]
fn encode_matches_documented_layout() {
    let hdr = PageHeader::new(0x12, 0x0304, 0x0506, 0x07_0809_0A0B);
    let raw = hdr.encode();

    assert_eq!(raw[0], 0x12);
    assert_eq!(&raw[1..3], &[0x04, 0x03]);
    assert_eq!(&raw[3..5], &[0x06, 0x05]);
    assert_eq!(&raw[5..10], &[0x0B, 0x0A, 0x09, 0x08, 0x07]);
    assert_eq!(u16::from_le_bytes([raw[10], raw[11]]), hdr.fcs);
}

#[test]
fn decode_restores_every_field() {
    let hdr = PageHeader::new(200, 116, 9, SEQ_MAX);
    let back = PageHeader::decode(&hdr.encode());

    assert_eq!(back, hdr);
    assert!(back.is_valid());
}

#[test]
fn seq_is_truncated_to_forty_bits() {
    let hdr = PageHeader::new(1, 0, 0, SEQ_MAX + 2);
    assert_eq!(hdr.seq, 1);
}

#[test]
fn rotating_hash_of_known_bytes() {
    assert_eq!(rotating_hash(&[]), 0);
    assert_eq!(rotating_hash(&[0xAB]), 0x00AB);
    // 0x0001 -> rotl 4 = 0x0010 ^ 0x02
    assert_eq!(rotating_hash(&[0x01, 0x02]), 0x0012);
}

#[test]
fn erased_footer_is_not_valid() {
    let hdr = PageHeader::decode(&[0xFF; HEADER_LEN]);
    assert!(!hdr.is_valid(), "all-ones footer must read as free");
}

#[test]
fn any_field_change_breaks_checksum() {
    let base = PageHeader::new(3, 50, 2, 7);

    let mut h = base;
    h.fill += 1;
    assert!(!h.is_valid());

    let mut h = base;
    h.seq += 1;
    assert!(!h.is_valid());

    let mut h = base;
    h.inode = 4;
    assert!(!h.is_valid());

    let mut h = base;
    h.pgoff = 0;
    h.stamp();
    assert!(h.is_valid());
}

#[test]
fn flipped_fcs_byte_is_detected() {
    let mut raw = PageHeader::new(0, 116, 0, 0).encode();
    raw[11] ^= 0x80;
    assert!(!PageHeader::decode(&raw).is_valid());
}
