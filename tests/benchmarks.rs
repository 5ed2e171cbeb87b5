//! Microbenchmarks of buffer reads and writes and of heap churn.
//!
//! Invoke with
//! ```
//!     cargo +nightly bench [partial_test_name] --test benchmarks \
//!         --features bench
//! ```
//!
//! `#[bench]` requires `#![feature(test)]` and therefore nightly, so the code
//! is gated behind the "bench" feature.
#![cfg(feature = "bench")]
#![feature(test)]

extern crate test;

use lazy_buffers::{Buffer, BufferConfig, ByteRange, HeapConfig, MinHeap};
use test::Bencher;

const N: usize = 1 << 16;

#[bench]
fn write_u32_sequential(b: &mut Bencher) {
    b.iter(|| {
        let buf = Buffer::new();
        let mut it = buf.iter();
        for i in 0..(N / 4) as u32 {
            it.write_u32(i).unwrap();
        }
    });
}

#[bench]
fn read_u8_prepared(b: &mut Bencher) {
    let buf = Buffer::from_vec(vec![7; N]);
    b.iter(|| {
        let mut it = buf.iter();
        let mut sum = 0u64;
        while !it.is_at_end() {
            sum += it.read_u8().unwrap() as u64;
        }
        sum
    });
}

#[bench]
fn fill_in_small_chunks(b: &mut Bencher) {
    b.iter(|| {
        let buf = Buffer::with_config(BufferConfig::default().with_chunk_size(64));
        buf.ensure_range(0, N as i64).unwrap();
        buf.cache_range(ByteRange::new(0, N)).unwrap();
        buf.part_count()
    });
}

#[bench]
fn heap_insert_remove(b: &mut Bencher) {
    b.iter(|| {
        let mut heap: MinHeap<i64, usize> = MinHeap::new(HeapConfig::growable());
        for i in 0..4096usize {
            heap.insert(i, ((i * 7919) % 4099) as i64).unwrap();
        }
        while heap.remove_root().is_some() {}
    });
}
