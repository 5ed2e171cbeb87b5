//! Error types for buffers and heaps.

use crate::buffer::ByteRange;
use thiserror::Error;

/// Result type alias using [`BufferError`].
pub type Result<T> = std::result::Result<T, BufferError>;

/// Errors reported by [`Buffer`](crate::Buffer) and its iterators.
#[derive(Debug, Error)]
pub enum BufferError {
    /// A filler or file source failed to produce bytes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A range was given with its bounds reversed.
    #[error("invalid range: start {start} exceeds end {end}")]
    InvalidRange { start: i64, end: i64 },

    /// The buffer's range is fixed and the request lies outside of it.
    #[error("range [{start}, {end}) lies outside fixed range {range}")]
    RangeFixed { start: i64, end: i64, range: ByteRange },

    /// An offset or extent lies past the buffer's bytes.
    #[error("offset {offset} lies outside buffer range {range}")]
    OutOfRange { offset: i64, range: ByteRange },

    /// A write reached constant memory; nothing was written.
    #[error("memory at offset {offset} is read-only")]
    ReadOnly { offset: i64 },

    /// An operation that does not materialize bytes reached a sparse part.
    #[error("offset {offset} is not materialized")]
    Sparse { offset: i64 },

    /// A byte operation was issued between bit reads.
    #[error("iterator is not at a byte boundary (bit offset {bit})")]
    Unaligned { bit: u8 },

    /// A repeat reaches before the start of the buffer.
    #[error("cannot repeat {count} bytes from distance {distance}")]
    InvalidRepeat { distance: usize, count: usize },
}

/// Errors reported by [`Heap`](crate::Heap).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// An insert into a full heap of fixed capacity.
    #[error("heap overflow: fixed capacity {capacity} reached")]
    Overflow { capacity: usize },

    /// A handle operation on a heap without back-pointers.
    #[error("heap was configured without back-pointers")]
    BackPointersDisabled,

    /// The handle does not refer to a live entry.
    #[error("handle does not refer to an entry in the heap")]
    NotInHeap,
}
