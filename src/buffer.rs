//! Sparse, lazily materialized byte buffers.
//!
//! A [`Buffer`] is a logical byte range over a sequence of parts.  A part is
//! either sparse (no bytes yet) or a window into a shared [`MemoryBlock`].
//! Sparse parts are materialized on demand: from another buffer (sharing its
//! blocks), from a [`Filler`], or as zeroed storage.

mod block;
mod iter;
mod part;
mod source;
mod tree;

pub use block::MemoryBlock;
pub use iter::BufferIter;
pub use source::Filler;

use self::part::BufferPart;
use self::source::{BufferSource, FileFiller};
use self::tree::PartTree;
use crate::config::{BufferConfig, Endianness, Newline};
use crate::error::{BufferError, Result};
use bytes::Bytes;
use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

/// A half-open byte range `[origin, origin + len)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte of the range.
    pub origin: i64,
    /// Number of bytes.
    pub len: usize,
}

impl ByteRange {
    /// Builds the range `[origin, origin + len)`.
    pub fn new(origin: i64, len: usize) -> Self {
        ByteRange { origin, len }
    }

    /// Builds the range `[start, end)`, or `None` if `start > end`.
    pub fn from_bounds(start: i64, end: i64) -> Option<Self> {
        (start <= end).then(|| ByteRange::new(start, (end - start) as usize))
    }

    /// One past the last byte.
    pub fn end(&self) -> i64 {
        self.origin + self.len as i64
    }

    /// Returns true if the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if `offset` lies inside the range.
    pub fn contains(&self, offset: i64) -> bool {
        self.origin <= offset && offset < self.end()
    }

    /// Returns the overlap of both ranges, if any.
    pub fn intersect(&self, other: &ByteRange) -> Option<ByteRange> {
        let start = self.origin.max(other.origin);
        let end = self.end().min(other.end());
        (start < end).then(|| ByteRange::new(start, (end - start) as usize))
    }
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.origin, self.end())
    }
}

struct Inner {
    range: ByteRange,
    range_fixed: bool,
    parts: PartTree,
    source: Option<BufferSource>,
    config: BufferConfig,
    generation: u64,
    live_iterators: usize,
}

/// A shared handle to a sparse byte buffer.
///
/// Cloning a `Buffer` yields another handle to the same bytes.  Use
/// [`Buffer::copy`] for a buffer with its own part structure.
///
/// # Examples
///
/// ```
/// use lazy_buffers::Buffer;
///
/// let buf = Buffer::new();
/// let mut it = buf.iter();
/// it.write_str("hello").unwrap();
/// drop(it);
///
/// assert_eq!(buf.len(), 5);
/// assert!(buf.equals_data(b"hello").unwrap());
/// ```
#[derive(Clone)]
pub struct Buffer(Rc<RefCell<Inner>>);

impl Buffer {
    /// Creates an empty storage buffer with a growable range.
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    /// Like [`new`](#method.new), with explicit settings.
    pub fn with_config(config: BufferConfig) -> Self {
        Self::from_inner(Inner::new(config, None))
    }

    /// Wraps constant data.  The range is fixed and writes are rejected.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::from_block(MemoryBlock::from_static(data))
    }

    /// Wraps shared constant bytes.  The range is fixed.
    pub fn from_bytes(data: Bytes) -> Self {
        Self::from_block(MemoryBlock::from_bytes(data))
    }

    /// Takes ownership of mutable data.  The range is fixed.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::from_block(MemoryBlock::from_vec(data))
    }

    /// Like [`from_vec`](#method.from_vec), but `release` receives the bytes
    /// once neither this buffer nor any buffer sharing them holds them.
    pub fn from_vec_with_release<F>(data: Vec<u8>, release: F) -> Self
    where
        F: FnOnce(Vec<u8>) + 'static,
    {
        Self::from_block(MemoryBlock::from_vec_with_release(data, release))
    }

    /// Creates a view of `src` over `range`.  The view's bytes start at
    /// offset 0; they are sparse until prepared and then alias the blocks of
    /// `src`.
    pub fn extract(src: &Buffer, range: ByteRange) -> Self {
        let config = src.config();
        let mut inner = Inner::new(
            config,
            Some(BufferSource::Buffer {
                buffer: src.clone(),
                offset: range.origin,
            }),
        );
        inner.range = ByteRange::new(0, range.len);
        if range.len > 0 {
            inner.parts.push_back(BufferPart::sparse(range.len));
        }
        inner.range_fixed = true;
        Self::from_inner(inner)
    }

    /// Prepares `src` over `range` and returns a buffer sharing its blocks,
    /// or holding private copies of them if `decouple` is set.
    pub fn copy(src: &Buffer, range: ByteRange, decouple: bool) -> Result<Self> {
        let pieces = if range.is_empty() {
            Vec::new()
        } else {
            src.share_range(range.origin, range.len)?
        };

        let mut inner = Inner::new(src.config(), None);
        inner.range = ByteRange::new(0, range.len);
        for p in pieces {
            let at = inner.parts.len();
            inner.parts.push_back(p);
            inner.parts.coalesce(at);
        }
        if decouple {
            inner.parts.for_each_mut(BufferPart::detach);
        }
        inner.range_fixed = true;
        Ok(Self::from_inner(inner))
    }

    /// Creates a growable buffer whose bytes are produced by `filler`.  The
    /// filler sees buffer offsets shifted by `offset`.
    pub fn with_filler<F>(filler: F, offset: i64) -> Self
    where
        F: Filler + 'static,
    {
        Self::with_filler_config(filler, offset, BufferConfig::default())
    }

    /// Like [`with_filler`](#method.with_filler), with explicit settings.
    /// The filler is called once per materialized chunk of
    /// `config.chunk_size` bytes.
    pub fn with_filler_config<F>(filler: F, offset: i64, config: BufferConfig) -> Self
    where
        F: Filler + 'static,
    {
        Self::from_inner(Inner::new(
            config,
            Some(BufferSource::Filler {
                filler: Rc::new(filler),
                offset,
            }),
        ))
    }

    /// Opens a file as a buffer.  The range is fixed to the file size and
    /// bytes are read as they are prepared.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_config(path, BufferConfig::default())
    }

    /// Like [`from_file`](#method.from_file), with explicit settings.  The
    /// file is read in chunks of `config.chunk_size` bytes.
    pub fn from_file_with_config<P: AsRef<Path>>(path: P, config: BufferConfig) -> Result<Self> {
        let path = path.as_ref();
        let (filler, size) = FileFiller::open(path)?;
        debug!(path = %path.display(), size, chunk = config.chunk_size, "buffer.from_file");

        let buf = Self::with_filler_config(filler, 0, config);
        buf.ensure_range(0, size as i64)?;
        buf.fix_range();
        Ok(buf)
    }

    fn from_block(block: Rc<MemoryBlock>) -> Self {
        let len = block.len();
        let mut inner = Inner::new(BufferConfig::default(), None);
        inner.range = ByteRange::new(0, len);
        if len > 0 {
            inner.parts.push_back(BufferPart::filled(block, 0, len));
        }
        inner.range_fixed = true;
        Self::from_inner(inner)
    }

    fn from_inner(inner: Inner) -> Self {
        Buffer(Rc::new(RefCell::new(inner)))
    }

    /// Runs `f` with invariant checks before and after in debug builds.
    fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Inner) -> Result<R>,
    {
        let mut inner = self.0.borrow_mut();
        inner.chk();
        let res = f(&mut *inner);
        inner.chk();
        res
    }

    /// Grows the range to cover `[start, end)` with sparse parts.
    pub fn ensure_range(&self, start: i64, end: i64) -> Result<()> {
        self.mutate(|inner| inner.ensure_range(start, end))
    }

    /// Ensures and materializes every byte of `range`.
    pub fn cache_range(&self, range: ByteRange) -> Result<()> {
        self.mutate(|inner| inner.prepare(range.origin, range.len))
    }

    /// Replaces the bytes of `range` by a single sparse part and drops the
    /// references to their blocks.  Offsets outside the buffer are ignored.
    pub fn dismiss_range(&self, range: ByteRange) -> Result<()> {
        self.mutate(|inner| {
            inner.dismiss(range);
            Ok(())
        })
    }

    /// Gives every filled part a private copy of its bytes so that no block
    /// is shared with another buffer.
    pub fn decouple(&self) {
        let mut inner = self.0.borrow_mut();
        inner.parts.for_each_mut(BufferPart::detach);
        inner.generation += 1;
        inner.chk();
        debug!(parts = inner.parts.part_count(), "buffer.decouple");
    }

    /// Finds the nearest occurrence of `byte` starting at `start` and moving
    /// forward or backward.  Sparse parts are not materialized.
    pub fn search_byte(&self, byte: u8, start: i64, forward: bool) -> Result<Option<i64>> {
        let inner = self.0.borrow();
        if !inner.range.contains(start) {
            return Ok(None);
        }

        let rel = inner.rel(start);
        if forward {
            for (s, p) in inner.parts.iter_from(rel) {
                let skip = rel.saturating_sub(s);
                let (block, off) = p.block().ok_or(BufferError::Sparse {
                    offset: inner.abs(s + skip),
                })?;
                let hit = block.with_slice(off + skip, p.len() - skip, |sl| {
                    sl.iter().position(|&b| b == byte)
                });
                if let Some(i) = hit {
                    return Ok(Some(inner.abs(s + skip + i)));
                }
            }
        } else {
            let mut pos = rel;
            loop {
                let (s, p) = inner.locate(pos);
                let (block, off) = p.block().ok_or(BufferError::Sparse {
                    offset: inner.abs(pos),
                })?;
                let hit = block.with_slice(off, pos - s + 1, |sl| {
                    sl.iter().rposition(|&b| b == byte)
                });
                if let Some(i) = hit {
                    return Ok(Some(inner.abs(s + i)));
                }
                if s == 0 {
                    break;
                }
                pos = s - 1;
            }
        }

        Ok(None)
    }

    /// Compares all bytes of both buffers.  Windows that alias the same
    /// memory are not compared byte by byte.
    pub fn equals_buffer(&self, other: &Buffer) -> Result<bool> {
        if Rc::ptr_eq(&self.0, &other.0) {
            return Ok(true);
        }

        let a = self.0.borrow();
        let b = other.0.borrow();
        if a.range.len != b.range.len {
            return Ok(false);
        }

        for (s, p) in a.parts.iter() {
            let (blk, off) = p.block().ok_or(BufferError::Sparse { offset: a.abs(s) })?;
            let mut done = 0;
            for q in b.parts.slices(s, p.len()) {
                let (qblk, qoff) = q.block().ok_or(BufferError::Sparse {
                    offset: b.abs(s + done),
                })?;
                let lhs = blk.as_ptr().wrapping_add(off + done);
                let rhs = qblk.as_ptr().wrapping_add(qoff);
                if lhs != rhs {
                    let eq = blk.with_slice(off + done, q.len(), |x| {
                        qblk.with_slice(qoff, q.len(), |y| x == y)
                    });
                    if !eq {
                        return Ok(false);
                    }
                }
                done += q.len();
            }
        }

        Ok(true)
    }

    /// Compares all bytes of the buffer with `data`.
    pub fn equals_data(&self, data: &[u8]) -> Result<bool> {
        let inner = self.0.borrow();
        if inner.range.len != data.len() {
            return Ok(false);
        }

        for (s, p) in inner.parts.iter() {
            let (blk, off) = p.block().ok_or(BufferError::Sparse {
                offset: inner.abs(s),
            })?;
            let want = &data[s..s + p.len()];
            if blk.as_ptr().wrapping_add(off) == want.as_ptr() {
                continue;
            }
            if !blk.with_slice(off, p.len(), |x| x == want) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Freezes the current range.  Later requests outside it fail.
    pub fn fix_range(&self) {
        self.0.borrow_mut().range_fixed = true;
    }

    /// Returns true once the range can no longer grow.
    pub fn is_range_fixed(&self) -> bool {
        self.0.borrow().range_fixed
    }

    /// The logical byte range covered by the parts.
    pub fn range(&self) -> ByteRange {
        self.0.borrow().range
    }

    /// Number of bytes in the range, materialized or not.
    pub fn len(&self) -> usize {
        self.0.borrow().range.len
    }

    /// Returns true if the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of parts, sparse and filled.
    pub fn part_count(&self) -> usize {
        self.0.borrow().parts.part_count()
    }

    /// Returns whether the byte at `offset` is unmaterialized, or `None` if
    /// `offset` lies outside the range.
    pub fn is_sparse_at(&self, offset: i64) -> Option<bool> {
        let inner = self.0.borrow();
        inner
            .range
            .contains(offset)
            .then(|| inner.locate(inner.rel(offset)).1.is_sparse())
    }

    /// Reads one byte, materializing it if necessary.
    pub fn byte_at(&self, offset: i64) -> Result<u8> {
        let range = self.range();
        if !range.contains(offset) {
            return Err(BufferError::OutOfRange { offset, range });
        }
        let mut out = [0u8; 1];
        self.read_at(offset, &mut out)?;
        Ok(out[0])
    }

    /// Returns all bytes of the buffer, materializing as needed.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let range = self.range();
        let mut out = vec![0u8; range.len];
        self.read_at(range.origin, &mut out)?;
        Ok(out)
    }

    /// Materializes the whole range and writes it to `path`.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = self.to_vec()?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Returns true if the byte at `offset` and the byte at `other_offset`
    /// of `other` are stored at the same address.
    pub fn shares_memory_with(&self, offset: i64, other: &Buffer, other_offset: i64) -> bool {
        match (self.byte_ptr(offset), other.byte_ptr(other_offset)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn byte_ptr(&self, offset: i64) -> Option<*const u8> {
        let inner = self.0.borrow();
        if !inner.range.contains(offset) {
            return None;
        }
        let rel = inner.rel(offset);
        let (s, p) = inner.locate(rel);
        p.block()
            .map(|(blk, off)| blk.as_ptr().wrapping_add(off + rel - s))
    }

    /// A copy of the current settings.
    pub fn config(&self) -> BufferConfig {
        self.0.borrow().config.clone()
    }

    /// Byte order used by iterator number reads and writes.
    pub fn endianness(&self) -> Endianness {
        self.0.borrow().config.endianness
    }

    /// Changes the byte order; open iterators see it on their next access.
    pub fn set_endianness(&self, endianness: Endianness) {
        self.0.borrow_mut().config.endianness = endianness;
    }

    /// Line ending written by [`BufferIter::write_newline`].
    pub fn newline(&self) -> Newline {
        self.0.borrow().config.newline
    }

    /// Changes the line ending.
    pub fn set_newline(&self, newline: Newline) {
        self.0.borrow_mut().config.newline = newline;
    }

    /// Returns an iterator positioned at the start of the range.
    pub fn iter(&self) -> BufferIter<'_> {
        BufferIter::new(self)
    }

    /// Number of iterators currently open on this buffer.
    pub fn live_iterators(&self) -> usize {
        self.0.borrow().live_iterators
    }

    pub(crate) fn iterator_opened(&self) {
        self.0.borrow_mut().live_iterators += 1;
    }

    pub(crate) fn iterator_closed(&self) {
        let mut inner = self.0.borrow_mut();
        debug_assert!(inner.live_iterators > 0, "iterator closed twice");
        inner.live_iterators = inner.live_iterators.saturating_sub(1);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.0.borrow().generation
    }

    /// Returns the absolute start and a copy of the part covering `offset`.
    pub(crate) fn part_at(&self, offset: i64) -> Option<(i64, BufferPart)> {
        let inner = self.0.borrow();
        if !inner.range.contains(offset) {
            return None;
        }
        let (s, p) = inner.locate(inner.rel(offset));
        Some((inner.abs(s), p.clone()))
    }

    /// Prepares `[offset, offset + len)` and returns its parts.
    fn share_range(&self, offset: i64, len: usize) -> Result<Vec<BufferPart>> {
        self.mutate(|inner| {
            inner.prepare(offset, len)?;
            Ok(inner.parts.slices(inner.rel(offset), len))
        })
    }

    pub(crate) fn prepare(&self, offset: i64, len: usize) -> Result<()> {
        self.mutate(|inner| inner.prepare(offset, len))
    }

    /// Materializes and copies `dst.len()` bytes starting at `offset`.
    pub(crate) fn read_at(&self, offset: i64, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let mut done = 0;
        for p in self.share_range(offset, dst.len())? {
            let (blk, off) = p.block().ok_or(BufferError::Sparse {
                offset: offset + done as i64,
            })?;
            blk.read(off, &mut dst[done..done + p.len()]);
            done += p.len();
        }
        Ok(())
    }

    /// Materializes `[offset, offset + src.len())` and overwrites it.  No
    /// byte changes unless every covered block is writable.
    pub(crate) fn write_at(&self, offset: i64, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let pieces = self.share_range(offset, src.len())?;

        let mut at = offset;
        for p in pieces.iter() {
            match p.block() {
                Some((blk, _)) if !blk.is_const() => at += p.len() as i64,
                _ => return Err(BufferError::ReadOnly { offset: at }),
            }
        }

        let mut done = 0;
        for p in pieces.iter() {
            if let Some((blk, off)) = p.block() {
                blk.write(off, &src[done..done + p.len()]);
            }
            done += p.len();
        }
        Ok(())
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::from_vec(data)
    }
}

impl From<&'static [u8]> for Buffer {
    fn from(data: &'static [u8]) -> Self {
        Buffer::from_static(data)
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Buffer")
            .field("range", &inner.range)
            .field("fixed", &inner.range_fixed)
            .field("source", &inner.source)
            .field("parts", &inner.parts)
            .finish()
    }
}

impl Inner {
    fn new(config: BufferConfig, source: Option<BufferSource>) -> Self {
        Inner {
            range: ByteRange::default(),
            range_fixed: false,
            parts: PartTree::new(),
            source,
            config,
            generation: 0,
            live_iterators: 0,
        }
    }

    fn rel(&self, offset: i64) -> usize {
        debug_assert!(offset >= self.range.origin);
        (offset - self.range.origin) as usize
    }

    fn abs(&self, rel: usize) -> i64 {
        self.range.origin + rel as i64
    }

    /// Returns the part covering relative offset `rel`, which must lie inside
    /// the range.
    fn locate(&self, rel: usize) -> (usize, &BufferPart) {
        match self.parts.locate(rel) {
            Some(found) => found,
            None => panic!("offset {rel} outside parts of {} bytes", self.parts.len()),
        }
    }

    fn ensure_range(&mut self, start: i64, end: i64) -> Result<()> {
        if start > end {
            return Err(BufferError::InvalidRange { start, end });
        }
        if start == end {
            return Ok(());
        }

        let range = self.range;
        if self.range_fixed {
            if start < range.origin || end > range.end() {
                return Err(BufferError::RangeFixed { start, end, range });
            }
            return Ok(());
        }

        if self.parts.is_empty() {
            let len = (end - start) as usize;
            self.parts.push_back(BufferPart::sparse(len));
            self.range = ByteRange::new(start, len);
        } else {
            if start < range.origin {
                let grow = (range.origin - start) as usize;
                self.grow_front(grow);
                self.range = ByteRange::new(start, self.range.len + grow);
            }
            if end > range.end() {
                let grow = (end - range.end()) as usize;
                self.grow_back(grow);
                self.range.len += grow;
            }
        }

        if self.range != range {
            self.generation += 1;
            debug!(from = %range, to = %self.range, "buffer.ensure_range");
        }
        Ok(())
    }

    fn grow_front(&mut self, grow: usize) {
        let sparse_len = match self.parts.first() {
            Some(BufferPart::Sparse(len)) => Some(*len),
            _ => None,
        };
        match sparse_len {
            Some(len) => {
                self.parts.update(0, |p| *p = BufferPart::sparse(len + grow));
            }
            None => self.parts.push_front(BufferPart::sparse(grow)),
        }
    }

    fn grow_back(&mut self, grow: usize) {
        let last = match self.parts.last() {
            Some((s, BufferPart::Sparse(len))) => Some((s, *len)),
            _ => None,
        };
        match last {
            Some((s, len)) => {
                self.parts.update(s, |p| *p = BufferPart::sparse(len + grow));
            }
            None => self.parts.push_back(BufferPart::sparse(grow)),
        }
    }

    /// Ensures `[offset, offset + len)` and materializes its sparse parts.
    fn prepare(&mut self, offset: i64, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.ensure_range(offset, offset + len as i64)?;

        let end = self.rel(offset) + len;
        let mut pos = self.rel(offset);
        while pos < end {
            let (s, part_len, sparse) = {
                let (s, p) = self.locate(pos);
                (s, p.len(), p.is_sparse())
            };
            if sparse {
                self.materialize(s, part_len, pos, end.min(s + part_len))?;
                // the part at `pos` is filled now
                continue;
            }
            pos = s + part_len;
        }
        Ok(())
    }

    /// Fills `[lo, hi)` of the sparse part `[start, start + len)`.  All
    /// offsets are relative.
    fn materialize(&mut self, start: usize, len: usize, lo: usize, hi: usize) -> Result<()> {
        let (lo, hi, pieces) = match &self.source {
            Some(BufferSource::Buffer { buffer, offset }) => {
                let src_start = self.abs(lo) + offset;
                debug!(src = src_start, len = hi - lo, "buffer.materialize.source");
                (lo, hi, buffer.share_range(src_start, hi - lo)?)
            }
            source => {
                let chunk = self.config.chunk_size.max(1) as i64;
                let abs_lo = self.abs(lo).div_euclid(chunk) * chunk;
                let abs_hi = (self.abs(hi) + chunk - 1).div_euclid(chunk) * chunk;
                let lo = self.rel(abs_lo.max(self.abs(start)));
                let hi = self.rel(abs_hi.min(self.abs(start + len)));

                let mut data = vec![0u8; hi - lo];
                if let Some(BufferSource::Filler { filler, offset }) = source {
                    filler.fill(&mut data, self.abs(lo) + offset)?;
                }
                debug!(offset = self.abs(lo), len = hi - lo, "buffer.materialize.fill");
                let block = MemoryBlock::from_vec(data);
                (lo, hi, vec![BufferPart::filled(block, 0, hi - lo)])
            }
        };

        let sparse = match self.parts.remove(start) {
            Some(p) => p,
            None => panic!("no part starts at {start}"),
        };
        let (before, _, after) = sparse.carve(lo - start, hi - lo);

        let mut at = start;
        let mut bounds = Vec::with_capacity(pieces.len() + 2);
        if let Some(b) = before {
            at += b.len();
            self.parts.insert(start, b);
        }
        for p in pieces {
            bounds.push(at);
            let l = p.len();
            self.parts.insert(at, p);
            at += l;
        }
        bounds.push(at);
        if let Some(a) = after {
            self.parts.insert(at, a);
        }

        for &b in bounds.iter().rev() {
            self.parts.coalesce(b);
        }
        self.generation += 1;
        Ok(())
    }

    fn dismiss(&mut self, range: ByteRange) {
        let Some(target) = self.range.intersect(&range) else {
            return;
        };
        let lo = self.rel(target.origin);
        let hi = lo + target.len;

        self.parts.split_at(lo);
        self.parts.split_at(hi);
        let mut removed = 0;
        while removed < target.len {
            match self.parts.remove(lo) {
                Some(p) => removed += p.len(),
                None => panic!("no part starts at {lo}"),
            }
        }
        debug_assert_eq!(removed, target.len);

        self.parts.insert(lo, BufferPart::sparse(target.len));
        self.parts.coalesce(hi);
        self.parts.coalesce(lo);
        self.generation += 1;
        debug!(range = %target, parts = self.parts.part_count(), "buffer.dismiss");
    }

    /// Checks that the parts cover the range and that no two neighbors
    /// could be merged into one part.
    #[cfg(debug_assertions)]
    fn chk(&self) {
        assert_eq!(self.parts.len(), self.range.len, "parts do not cover range");
        let mut prev: Option<&BufferPart> = None;
        for (s, p) in self.parts.iter() {
            if let Some(q) = prev {
                assert!(
                    !(q.is_sparse() && p.is_sparse()),
                    "adjacent sparse parts at {s}"
                );
                assert!(q.merge(p).is_none(), "unmerged contiguous windows at {s}");
            }
            prev = Some(p);
        }
    }

    #[cfg(not(debug_assertions))]
    fn chk(&self) {}
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(self.live_iterators, 0, "buffer dropped with open iterators");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;
    use std::io;

    fn counting_filler(calls: Rc<Cell<usize>>) -> impl Filler {
        move |dst: &mut [u8], offset: i64| -> io::Result<()> {
            calls.set(calls.get() + 1);
            for (i, b) in dst.iter_mut().enumerate() {
                *b = (offset + i as i64) as u8;
            }
            Ok(())
        }
    }

    #[test]
    fn ensure_range_merges_sparse_edges() {
        let buf = Buffer::new();
        buf.ensure_range(0, 100).unwrap();
        buf.ensure_range(50, 150).unwrap();
        assert_eq!(buf.range(), ByteRange::new(0, 150));
        assert_eq!(buf.part_count(), 1);
        assert_eq!(buf.is_sparse_at(149), Some(true));

        buf.ensure_range(-10, 0).unwrap();
        assert_eq!(buf.range(), ByteRange::new(-10, 160));
        assert_eq!(buf.part_count(), 1);
    }

    #[test]
    fn ensure_range_is_idempotent() {
        let buf = Buffer::new();
        buf.ensure_range(10, 20).unwrap();
        let gen = buf.generation();
        buf.ensure_range(10, 20).unwrap();
        buf.ensure_range(12, 18).unwrap();
        assert_eq!(buf.range(), ByteRange::new(10, 10));
        assert_eq!(buf.generation(), gen);
    }

    #[test]
    fn ensure_range_errors() {
        let buf = Buffer::new();
        assert!(matches!(
            buf.ensure_range(5, 4),
            Err(BufferError::InvalidRange { start: 5, end: 4 })
        ));

        let fixed = Buffer::from_static(b"0123456789");
        fixed.ensure_range(2, 8).unwrap();
        let err = fixed.ensure_range(5, 20).unwrap_err();
        assert_eq!(err.to_string(), "range [5, 20) lies outside fixed range [0, 10)");
    }

    #[test]
    fn storage_materializes_zeroed_chunks() {
        let buf = Buffer::with_config(BufferConfig::default().with_chunk_size(16));
        buf.ensure_range(0, 64).unwrap();
        buf.cache_range(ByteRange::new(20, 4)).unwrap();

        // [0,16) sparse, [16,32) filled, [32,64) sparse
        assert_eq!(buf.part_count(), 3);
        assert_eq!(buf.is_sparse_at(15), Some(true));
        assert_eq!(buf.is_sparse_at(16), Some(false));
        assert_eq!(buf.is_sparse_at(31), Some(false));
        assert_eq!(buf.is_sparse_at(32), Some(true));
        assert_eq!(buf.byte_at(20).unwrap(), 0);
    }

    #[test]
    fn filler_sees_source_offsets() {
        let calls = Rc::new(Cell::new(0));
        let buf = Buffer::with_filler(counting_filler(calls.clone()), 100);
        buf.ensure_range(0, 8).unwrap();
        assert_eq!(buf.to_vec().unwrap(), vec![100, 101, 102, 103, 104, 105, 106, 107]);
        assert_eq!(calls.get(), 1);

        // already materialized
        buf.cache_range(ByteRange::new(0, 8)).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn filler_chunk_size_is_configurable() {
        let calls = Rc::new(Cell::new(0));
        let config = BufferConfig::default().with_chunk_size(16);
        let buf = Buffer::with_filler_config(counting_filler(calls.clone()), 0, config);
        buf.ensure_range(0, 64).unwrap();
        buf.cache_range(ByteRange::new(20, 4)).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(buf.part_count(), 3);
        assert_eq!(buf.is_sparse_at(15), Some(true));
        assert_eq!(buf.is_sparse_at(16), Some(false));
        assert_eq!(buf.is_sparse_at(32), Some(true));
        assert_eq!(buf.byte_at(31).unwrap(), 31);
    }

    #[test]
    fn caching_twice_changes_nothing() {
        let calls = Rc::new(Cell::new(0));
        let config = BufferConfig::default().with_chunk_size(8);
        let buf = Buffer::with_filler_config(counting_filler(calls.clone()), 0, config);
        buf.ensure_range(0, 40).unwrap();

        buf.cache_range(ByteRange::new(5, 20)).unwrap();
        let parts = buf.part_count();
        let gen = buf.generation();
        let mut first = vec![0u8; 20];
        buf.read_at(5, &mut first).unwrap();

        buf.cache_range(ByteRange::new(5, 20)).unwrap();
        buf.cache_range(ByteRange::new(8, 4)).unwrap();
        let mut second = vec![0u8; 20];
        buf.read_at(5, &mut second).unwrap();
        assert_eq!(buf.part_count(), parts);
        assert_eq!(buf.generation(), gen);
        assert_eq!(first, second);

        let whole = buf.to_vec().unwrap();
        let (parts, calls_before) = (buf.part_count(), calls.get());
        buf.cache_range(buf.range()).unwrap();
        assert_eq!(buf.part_count(), parts);
        assert_eq!(buf.to_vec().unwrap(), whole);
        assert_eq!(calls.get(), calls_before);
    }

    #[test]
    fn piecewise_preparation_merges_windows() {
        let src = Buffer::from_vec((0..64).collect());
        let view = Buffer::extract(&src, ByteRange::new(8, 32));
        for start in [16, 0, 8, 24] {
            view.cache_range(ByteRange::new(start, 8)).unwrap();
        }

        assert_eq!(view.part_count(), 1);
        assert_eq!(view.to_vec().unwrap(), (8..40).collect::<Vec<u8>>());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "unmerged contiguous windows")]
    fn chk_rejects_mergeable_neighbors() {
        let block = MemoryBlock::zeroed(8);
        let mut inner = Inner::new(BufferConfig::default(), None);
        inner.range = ByteRange::new(0, 8);
        inner.parts.push_back(BufferPart::filled(block.clone(), 0, 4));
        inner.parts.push_back(BufferPart::filled(block, 4, 4));
        inner.chk();
    }

    #[test]
    fn search_forward_and_backward() {
        let buf = Buffer::from_static(b"abc,def,ghi");
        assert_eq!(buf.search_byte(b',', 0, true).unwrap(), Some(3));
        assert_eq!(buf.search_byte(b',', 4, true).unwrap(), Some(7));
        assert_eq!(buf.search_byte(b',', 6, false).unwrap(), Some(3));
        assert_eq!(buf.search_byte(b'x', 0, true).unwrap(), None);
        assert_eq!(buf.search_byte(b'a', 20, true).unwrap(), None);
    }

    #[test]
    fn search_stops_at_sparse_parts() {
        let buf = Buffer::new();
        buf.ensure_range(0, 10).unwrap();
        assert!(matches!(
            buf.search_byte(0, 0, true),
            Err(BufferError::Sparse { offset: 0 })
        ));
    }

    #[test]
    fn equality_uses_shared_windows() {
        let src = Buffer::from_vec(b"the quick brown fox".to_vec());
        let view = Buffer::extract(&src, ByteRange::new(4, 5));
        view.cache_range(view.range()).unwrap();
        assert!(view.equals_data(b"quick").unwrap());
        assert!(view.shares_memory_with(0, &src, 4));

        let copy = Buffer::copy(&src, ByteRange::new(4, 5), true).unwrap();
        assert!(copy.equals_buffer(&view).unwrap());
        assert!(!copy.shares_memory_with(0, &src, 4));
        assert!(!copy.equals_data(b"quack").unwrap());
    }

    #[test]
    fn dismiss_releases_blocks() {
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();
        let src = Buffer::from_vec_with_release(vec![1; 32], move |_| flag.set(true));

        let view = Buffer::copy(&src, ByteRange::new(0, 32), false).unwrap();
        drop(src);
        assert!(!released.get());

        view.dismiss_range(ByteRange::new(8, 8)).unwrap();
        assert_eq!(view.part_count(), 3);
        assert_eq!(view.is_sparse_at(8), Some(true));

        view.dismiss_range(ByteRange::new(-100, 200)).unwrap();
        assert_eq!(view.part_count(), 1);
        assert_eq!(view.len(), 32);
        assert!(released.get());
    }

    #[test]
    fn writes_to_const_memory_change_nothing() {
        let buf = Buffer::from_static(b"ABCDEFGHIJ");
        assert_eq!(buf.byte_at(3).unwrap(), b'D');
        assert!(matches!(
            buf.write_at(2, b"xy"),
            Err(BufferError::ReadOnly { offset: 2 })
        ));
        assert!(buf.equals_data(b"ABCDEFGHIJ").unwrap());
    }

    #[test]
    fn decouple_breaks_aliasing() {
        let src = Buffer::from_vec(vec![0; 20]);
        let view = Buffer::extract(&src, ByteRange::new(5, 10));
        view.cache_range(view.range()).unwrap();

        src.write_at(7, &[9]).unwrap();
        assert_eq!(view.byte_at(2).unwrap(), 9);

        view.decouple();
        src.write_at(7, &[1]).unwrap();
        assert_eq!(view.byte_at(2).unwrap(), 9);
    }

    #[test]
    fn byte_at_outside_range() {
        let buf = Buffer::from_static(b"abc");
        assert!(matches!(
            buf.byte_at(3),
            Err(BufferError::OutOfRange { offset: 3, .. })
        ));
    }

    #[test]
    fn byte_range_bounds() {
        let r = ByteRange::from_bounds(-2, 3).unwrap();
        assert_eq!(r, ByteRange::new(-2, 5));
        assert!(r.contains(-2) && !r.contains(3));
        assert_eq!(ByteRange::from_bounds(3, 2), None);
        assert_eq!(r.intersect(&ByteRange::new(0, 10)), Some(ByteRange::new(0, 3)));
        assert_eq!(r.intersect(&ByteRange::new(3, 10)), None);
        assert_eq!(r.to_string(), "[-2, 3)");
    }
}
