use lazy_buffers::{Buffer, BufferConfig, BufferError, ByteRange, Endianness};
use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

mod common;
use common::*;

#[test]
fn ensure_range_twice_covers_union() {
    let buf = Buffer::new();
    buf.ensure_range(0, 100).unwrap();
    buf.ensure_range(50, 150).unwrap();

    assert_eq!(buf.range(), ByteRange::new(0, 150));
    assert_eq!(buf.part_count(), 1);
    assert!((0..150).all(|i| buf.is_sparse_at(i) == Some(true)));
    assert_eq!(buf.is_sparse_at(150), None);
}

#[test]
fn const_data_reads_but_rejects_writes() {
    let buf = Buffer::from_static(b"ABCDEFGHIJ");
    assert_eq!(buf.byte_at(3).unwrap(), b'D');

    let mut it = buf.iter();
    assert!(it.seek(3));
    assert!(matches!(
        it.write_bytes(b"xyz"),
        Err(BufferError::ReadOnly { offset: 3 })
    ));
    drop(it);
    assert!(buf.equals_data(b"ABCDEFGHIJ").unwrap());
}

#[test]
fn extraction_aliases_source() {
    let b1 = Buffer::from_vec((0..20).collect());
    let b2 = Buffer::extract(&b1, ByteRange::new(5, 10));
    b2.cache_range(b2.range()).unwrap();
    assert_eq!(b2.byte_at(2).unwrap(), 7);

    let mut it = b1.iter();
    assert!(it.seek(7));
    it.write_u8(0xaa).unwrap();
    drop(it);

    assert_eq!(b2.byte_at(2).unwrap(), 0xaa);
    assert!(b2.shares_memory_with(2, &b1, 7));
}

#[test]
fn copy_with_decouple_does_not_alias() {
    let b1 = Buffer::from_vec((0..20).collect());
    let b2 = Buffer::copy(&b1, ByteRange::new(5, 10), true).unwrap();

    let mut it = b1.iter();
    assert!(it.seek(7));
    it.write_u8(0xaa).unwrap();
    drop(it);

    assert_eq!(b2.byte_at(2).unwrap(), 7);
    assert!(!b2.shares_memory_with(2, &b1, 7));
}

#[test]
fn extraction_is_lazy_and_chains() {
    let calls = Rc::new(Cell::new(0usize));
    let seen = calls.clone();
    let root = Buffer::with_filler(
        move |dst: &mut [u8], offset: i64| {
            seen.set(seen.get() + 1);
            pattern_filler(dst, offset)
        },
        0,
    );
    root.ensure_range(0, 10_000).unwrap();

    let mid = Buffer::extract(&root, ByteRange::new(1000, 5000));
    let leaf = Buffer::extract(&mid, ByteRange::new(500, 100));
    assert_eq!(calls.get(), 0);

    let data = leaf.to_vec().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(data.len(), 100);
    assert!(data
        .iter()
        .enumerate()
        .all(|(i, &b)| b == pattern_byte(1500 + i as i64)));

    // the filler wrote a whole aligned chunk into root
    assert_eq!(root.is_sparse_at(0), Some(false));
    assert_eq!(root.is_sparse_at(4095), Some(false));
    assert_eq!(root.is_sparse_at(4096), Some(true));
    assert!(leaf.shares_memory_with(0, &root, 1500));
}

#[test]
fn extraction_outside_fixed_source_fails() {
    let src = Buffer::from_static(b"short");
    let view = Buffer::extract(&src, ByteRange::new(2, 10));
    assert!(matches!(
        view.to_vec(),
        Err(BufferError::RangeFixed { start: 2, end: 12, .. })
    ));
}

#[test]
fn filler_offsets_are_applied() {
    let buf = Buffer::with_filler(pattern_filler, 1000);
    buf.ensure_range(-5, 5).unwrap();
    let data = buf.to_vec().unwrap();
    let want: Vec<u8> = (995..1005).map(pattern_byte).collect();
    assert_eq!(data, want);
}

#[test]
fn file_buffers_read_lazily() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    let content: Vec<u8> = (0..10_000).map(pattern_byte).collect();
    tmp.write_all(&content).unwrap();
    tmp.flush().unwrap();

    let buf = Buffer::from_file(tmp.path()).unwrap();
    assert!(buf.is_range_fixed());
    assert_eq!(buf.len(), 10_000);
    assert_eq!(buf.is_sparse_at(9000), Some(true));

    let mut it = buf.iter();
    assert!(it.seek(9000));
    let mut out = [0u8; 16];
    it.read_bytes(&mut out).unwrap();
    assert_eq!(&out[..], &content[9000..9016]);
    drop(it);

    assert_eq!(buf.is_sparse_at(0), Some(true));
    assert_eq!(buf.to_vec().unwrap(), content);
}

#[test]
fn file_chunk_size_is_configurable() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    let content: Vec<u8> = (0..1000).map(pattern_byte).collect();
    tmp.write_all(&content).unwrap();
    tmp.flush().unwrap();

    let config = BufferConfig::default().with_chunk_size(100);
    let buf = Buffer::from_file_with_config(tmp.path(), config).unwrap();
    assert_eq!(buf.byte_at(550).unwrap(), content[550]);

    assert_eq!(buf.is_sparse_at(499), Some(true));
    assert_eq!(buf.is_sparse_at(500), Some(false));
    assert_eq!(buf.is_sparse_at(599), Some(false));
    assert_eq!(buf.is_sparse_at(600), Some(true));
    assert_eq!(buf.part_count(), 3);
}

#[test]
fn write_to_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");

    let buf = Buffer::new();
    let mut it = buf.iter();
    it.write_str("line one").unwrap();
    it.write_newline().unwrap();
    it.write_buffer(&Buffer::from_static(b"--tail--"), ByteRange::new(2, 4))
        .unwrap();
    drop(it);

    buf.write_to_file(&path).unwrap();
    let back = Buffer::from_file(&path).unwrap();
    assert!(back.equals_buffer(&buf).unwrap());
}

#[test]
fn numbers_round_trip_in_both_orders() {
    for endianness in [Endianness::Little, Endianness::Big, Endianness::Network] {
        let buf = Buffer::with_config(BufferConfig::default().with_endianness(endianness));
        let mut it = buf.iter();
        it.write_u8(0xfe).unwrap();
        it.write_i32(-123_456).unwrap();
        it.write_u64(u64::MAX - 7).unwrap();
        it.write_f32(-0.25).unwrap();

        it.locate_start();
        assert_eq!(it.read_u8().unwrap(), 0xfe);
        assert_eq!(it.read_i32().unwrap(), -123_456);
        assert_eq!(it.read_u64().unwrap(), u64::MAX - 7);
        assert_eq!(it.read_f32().unwrap(), -0.25);
        assert!(it.is_at_end());
    }
}

#[test]
fn network_order_is_big_endian() {
    let buf = Buffer::with_config(BufferConfig::default().with_endianness(Endianness::Network));
    let mut it = buf.iter();
    it.write_u16(0x1234).unwrap();
    drop(it);
    assert_eq!(buf.to_vec().unwrap(), vec![0x12, 0x34]);
}

#[test]
fn release_runs_after_last_view() {
    let released = Rc::new(Cell::new(false));
    let flag = released.clone();
    let src = Buffer::from_vec_with_release(vec![3; 64], move |v| {
        assert_eq!(v.len(), 64);
        flag.set(true);
    });

    let view = Buffer::extract(&src, ByteRange::new(10, 10));
    view.cache_range(view.range()).unwrap();
    drop(src);
    assert!(!released.get());

    drop(view);
    assert!(released.get());
}

#[test]
fn search_across_parts() {
    let buf = Buffer::new();
    let mut it = buf.iter();
    it.write_str("key=value").unwrap();
    it.write_buffer(&Buffer::from_static(b";next=1"), ByteRange::new(0, 7))
        .unwrap();
    drop(it);

    assert_eq!(buf.search_byte(b';', 0, true).unwrap(), Some(9));
    assert_eq!(buf.search_byte(b'=', 10, true).unwrap(), Some(14));
    assert_eq!(buf.search_byte(b'=', 13, false).unwrap(), Some(3));
}

#[test]
fn growing_on_both_sides() {
    let buf = Buffer::new();
    buf.ensure_range(100, 104).unwrap();
    let mut it = buf.iter();
    assert_eq!(it.position(), 100);
    it.write_bytes(b"mid!").unwrap();
    drop(it);

    buf.ensure_range(96, 108).unwrap();
    assert_eq!(buf.part_count(), 3);
    assert_eq!(buf.to_vec().unwrap(), b"\0\0\0\0mid!\0\0\0\0".to_vec());
    assert_eq!(buf.range(), ByteRange::new(96, 12));
}
