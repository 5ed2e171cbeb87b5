use proptest::prelude::*;
use std::io;

/// An operation applied to a buffer and to a `Vec<u8>` model in lockstep.
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub(super) enum BufOp {
    Write(u16, Vec<u8>),
    Read(u16, u16),
    Dismiss(u16, u16),
    Repeat(u8, u8),
    Decouple,
}

#[allow(dead_code)]
pub(super) fn buf_ops() -> impl Strategy<Value = Vec<BufOp>> {
    let op = prop_oneof![
        4 => (0u16..1024, prop::collection::vec(any::<u8>(), 1..64))
            .prop_map(|(o, d)| BufOp::Write(o, d)),
        3 => (0u16..1024, 1u16..256).prop_map(|(o, n)| BufOp::Read(o, n)),
        2 => (0u16..1024, 1u16..256).prop_map(|(o, n)| BufOp::Dismiss(o, n)),
        1 => (1u8..32, 1u8..64).prop_map(|(d, n)| BufOp::Repeat(d, n)),
        1 => Just(BufOp::Decouple),
    ];
    prop::collection::vec(op, 0..64)
}

/// An operation applied to a heap and to a sorted model.  Indices select a
/// live tracked entry modulo the number of entries.
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub(super) enum HeapOp {
    Insert(i64),
    RemoveRoot,
    RemoveTracked(usize),
    Update(usize, i64),
}

#[allow(dead_code)]
pub(super) fn heap_ops() -> impl Strategy<Value = Vec<HeapOp>> {
    let op = prop_oneof![
        4 => (-100i64..100).prop_map(HeapOp::Insert),
        2 => Just(HeapOp::RemoveRoot),
        1 => any::<usize>().prop_map(HeapOp::RemoveTracked),
        1 => (any::<usize>(), -100i64..100).prop_map(|(i, k)| HeapOp::Update(i, k)),
    ];
    prop::collection::vec(op, 0..256)
}

/// Byte `i` of the pattern is `i mod 251`.
#[allow(dead_code)]
pub(super) fn pattern_byte(offset: i64) -> u8 {
    offset.rem_euclid(251) as u8
}

#[allow(dead_code)]
pub(super) fn pattern_filler(dst: &mut [u8], offset: i64) -> io::Result<()> {
    for (i, b) in dst.iter_mut().enumerate() {
        *b = pattern_byte(offset + i as i64);
    }
    Ok(())
}
