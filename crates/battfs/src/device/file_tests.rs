use super::*;
use rand::RngCore;
use tempfile::{NamedTempFile, TempDir};

const GEOM: Geometry = Geometry::new(128, 64);

#[test]
fn open_prealloc_creates_erased_image() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("flash.img");

    let mut f = FileFlash::open_prealloc(&path, GEOM).expect("open_prealloc");
    assert!(f.freshly_erased);
    let meta = std::fs::metadata(&path).expect("metadata");
    assert_eq!(meta.len(), GEOM.raw_len(), "image must be pre-sized");

    let mut buf = vec![0u8; GEOM.page_size];
    f.load(10, &mut buf).expect("load");
    assert!(buf.iter().all(|&b| b == ERASED_BYTE));
}

#[test]
fn empty_existing_file_is_erased_too() {
    let tf = NamedTempFile::new().expect("tmp file");

    let mut f = FileFlash::open_prealloc(tf.path(), GEOM).expect("open_prealloc");
    assert!(f.freshly_erased);

    let mut buf = [0u8; 16];
    assert_eq!(f.read(0, 0, &mut buf).expect("read"), 16);
    assert_eq!(buf, [ERASED_BYTE; 16]);
}

#[test]
fn mismatched_image_length_is_rejected() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("flash.img");
    std::fs::write(&path, [0u8; 100]).expect("write");

    let err = FileFlash::open_prealloc(&path, GEOM).err().expect("must fail");
    assert!(err.to_string().contains("geometry expects"));
}

#[test]
fn save_then_reopen_keeps_page() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("flash.img");

    let mut data = vec![0u8; GEOM.page_size];
    rand::rng().fill_bytes(&mut data);

    {
        let mut f = FileFlash::open_prealloc(&path, GEOM).expect("open_prealloc");
        f.erase(7).expect("erase");
        f.save(7, &data).expect("save");
        f.close().expect("close");
        assert!(!f.is_operational());
    }

    {
        let mut f = FileFlash::open_prealloc(&path, GEOM).expect("reopen");
        assert!(!f.freshly_erased);
        let mut back = vec![0u8; GEOM.page_size];
        f.load(7, &mut back).expect("load");
        assert_eq!(back, data);
    }
}

#[test]
fn read_is_truncated_at_page_end() {
    let dir = TempDir::new().expect("tmp dir");
    let mut f = FileFlash::open_prealloc(dir.path().join("f.img"), GEOM).expect("open");

    let mut buf = vec![0u8; 64];
    let n = f.read(3, GEOM.page_size - 20, &mut buf).expect("read");
    assert_eq!(n, 20, "read must stop at the page boundary");
    assert_eq!(f.read(3, GEOM.page_size, &mut buf).expect("read"), 0);
}

#[test]
fn out_of_range_page_is_an_error() {
    let dir = TempDir::new().expect("tmp dir");
    let mut f = FileFlash::open_prealloc(dir.path().join("f.img"), GEOM).expect("open");

    let err = f.erase(64).expect_err("page 64 does not exist");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn closed_image_refuses_io() {
    let dir = TempDir::new().expect("tmp dir");
    let mut f = FileFlash::open_prealloc(dir.path().join("f.img"), GEOM).expect("open");
    f.close().expect("close");

    assert!(f.open().is_err());
    let mut buf = [0u8; 4];
    assert!(f.read(0, 0, &mut buf).is_err());
}

#[test]
fn format_erases_everything() {
    let dir = TempDir::new().expect("tmp dir");
    let mut f = FileFlash::open_prealloc(dir.path().join("f.img"), GEOM).expect("open");
    f.save(0, &vec![0u8; GEOM.page_size]).expect("save");

    f.format().expect("format");

    let mut buf = vec![0u8; GEOM.page_size];
    f.load(0, &mut buf).expect("load");
    assert!(buf.iter().all(|&b| b == ERASED_BYTE));
}
