use super::*;
use crate::test_utils::{PAGE_SIZE, PAYLOAD, erased_flash, footer, pattern, write_page};

fn geom(pages: usize) -> Geometry {
    Geometry::new(PAGE_SIZE, pages)
}

#[test]
fn load_is_noop_for_cached_page() {
    let mut flash = erased_flash(4);
    let mut cache = PageCache::new(&geom(4));

    cache.load(&mut flash, 2).unwrap();
    cache.load(&mut flash, 2).unwrap();

    assert_eq!(cache.page(), Some(2));
    assert_eq!(flash.counters.loads, 1);
}

#[test]
fn load_reads_full_page() {
    let mut flash = erased_flash(4);
    let hdr = PageHeader::new(5, 10, 0, 3);
    let data = pattern(1, 10);
    write_page(&mut flash, 1, &hdr, &data);

    let mut cache = PageCache::new(&geom(4));
    cache.load(&mut flash, 1).unwrap();

    let mut out = vec![0u8; 10];
    cache.buffer_read(0, &mut out);
    assert_eq!(out, data);
    assert_eq!(cache.header(), hdr);
    assert!(!cache.is_dirty());
}

#[test]
fn flush_is_noop_when_clean() {
    let mut flash = erased_flash(4);
    let mut cache = PageCache::new(&geom(4));
    cache.load(&mut flash, 0).unwrap();

    cache.flush(&mut flash).unwrap();

    assert_eq!(flash.counters.saves, 0);
    assert_eq!(flash.counters.erases, 0);
}

#[test]
fn switching_pages_writes_back_dirty_buffer() {
    let mut flash = erased_flash(4);
    let mut cache = PageCache::new(&geom(4));

    cache.load(&mut flash, 0).unwrap();
    cache.buffer_write(3, b"abc");
    assert!(cache.is_dirty());

    cache.load(&mut flash, 1).unwrap();

    assert_eq!(&flash.page(0)[3..6], b"abc");
    assert_eq!(flash.counters.saves, 1);
    assert!(!cache.is_dirty());
    assert_eq!(cache.page(), Some(1));
}

#[test]
fn retarget_saves_new_copy_and_erases_old() {
    let mut flash = erased_flash(4);
    let hdr = PageHeader::new(0, 4, 0, 1);
    write_page(&mut flash, 0, &hdr, b"old!");

    let mut cache = PageCache::new(&geom(4));
    cache.load(&mut flash, 0).unwrap();
    cache.retarget(3, 0);
    cache.buffer_write(0, b"new!");
    cache.set_header(&PageHeader::new(0, 4, 0, 2));
    assert_eq!(cache.superseded(), Some(0));

    cache.flush(&mut flash).unwrap();

    assert_eq!(&flash.page(3)[..4], b"new!");
    assert_eq!(footer(&flash, 3).seq, 2);
    assert!(flash.page(0).iter().all(|&b| b == 0xFF), "old copy erased");
    assert_eq!(cache.superseded(), None);
}

#[test]
fn failed_flush_keeps_buffer_dirty() {
    let mut flash = erased_flash(2);
    let mut cache = PageCache::new(&geom(2));
    cache.load(&mut flash, 0).unwrap();
    cache.buffer_write(0, &[1, 2, 3]);

    flash.set_write_protected(true);
    assert!(cache.flush(&mut flash).is_err());
    assert!(cache.is_dirty());

    flash.set_write_protected(false);
    cache.flush(&mut flash).unwrap();
    assert_eq!(&flash.page(0)[..3], &[1, 2, 3]);
}

#[test]
fn reset_starts_blank_page_with_header() {
    let mut flash = erased_flash(2);
    let mut cache = PageCache::new(&geom(2));
    let hdr = PageHeader::new(9, 0, 0, 0);

    cache.reset(1, &hdr);
    assert!(cache.is_dirty());
    cache.flush(&mut flash).unwrap();

    assert_eq!(footer(&flash, 1), hdr);
    assert!(flash.page(1)[..PAYLOAD].iter().all(|&b| b == 0xFF));
}

#[test]
#[should_panic(expected = "past page size")]
fn buffer_write_past_end_panics() {
    let mut cache = PageCache::new(&geom(1));
    cache.buffer_write(PAGE_SIZE - 2, &[0; 4]);
}

#[test]
#[should_panic(expected = "past page size")]
fn buffer_read_past_end_panics() {
    let cache = PageCache::new(&geom(1));
    let mut out = [0u8; 2];
    cache.buffer_read(PAGE_SIZE - 1, &mut out);
}

#[test]
fn invalidate_drops_dirty_state() {
    let mut flash = erased_flash(2);
    let mut cache = PageCache::new(&geom(2));
    cache.load(&mut flash, 0).unwrap();
    cache.buffer_write(0, &[0]);

    cache.invalidate();
    cache.flush(&mut flash).unwrap();

    assert_eq!(cache.page(), None);
    assert_eq!(flash.counters.saves, 0);
}
