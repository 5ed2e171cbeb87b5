//! # Lazily materialized byte buffers and a keyed binary heap
//!
//! `lazy-buffers` provides two collections.
//!
//! A [`Buffer`] is a logical byte range made of parts.  Parts are either
//! sparse or windows into reference-counted [`MemoryBlock`]s, so views and
//! copies of a buffer share memory until one of them is decoupled.  Sparse
//! bytes are produced on demand from another buffer, a [`Filler`], a file,
//! or as zeroed storage.  The parts live in a persistent AVL tree keyed by
//! byte offset, which makes locating, splitting and replacing a part
//! O(log n).  A [`BufferIter`] reads and writes through a buffer with
//! configurable endianness, bit-level reads and LZ77-style repeats.
//!
//! A [`Heap`] is a binary heap of payloads keyed by floats, integers or
//! timestamps, in min-first or max-first order.  Optional [`HeapHandle`]
//! back-pointers allow removing or re-keying any entry.

mod config;
pub use config::{BufferConfig, Endianness, HeapConfig, Newline, DEFAULT_CHUNK_SIZE};

mod error;
pub use error::{BufferError, HeapError, Result};

mod heap;
pub use heap::{Heap, HeapHandle, HeapKey, HeapOrder, MaxFirst, MaxHeap, MinFirst, MinHeap};

mod buffer;
pub use buffer::{Buffer, BufferIter, ByteRange, Filler, MemoryBlock};
