use super::block::MemoryBlock;
use super::{Buffer, ByteRange};
use crate::error::{BufferError, Result};
use std::rc::{Rc, Weak};

/// The part the iterator last touched, valid while the buffer generation
/// is unchanged.  The block is held weakly so that an idle iterator does not
/// keep dismissed memory alive.
struct Cached {
    generation: u64,
    start: i64,
    len: usize,
    window: Option<(Weak<MemoryBlock>, usize)>,
}

/// A cursor for reading and writing a [`Buffer`].
///
/// Reads and writes prepare the bytes they touch, growing the buffer's range
/// if it is not fixed.  Multi-byte numbers use the buffer's endianness.
///
/// # Examples
/// ```
/// use lazy_buffers::{Buffer, BufferConfig, Endianness};
///
/// let buf = Buffer::with_config(BufferConfig::default().with_endianness(Endianness::Big));
/// let mut it = buf.iter();
/// it.write_u16(0x0102).unwrap();
/// it.locate_start();
/// assert_eq!(it.read_u8().unwrap(), 1);
/// assert_eq!(it.read_u8().unwrap(), 2);
/// ```
pub struct BufferIter<'a> {
    buffer: &'a Buffer,
    pos: i64,
    bit_offset: u8,
    line_number: usize,
    cached: Option<Cached>,
}

macro_rules! read_num {
    ($name:ident, $t:ty) => {
        #[doc = concat!("Reads a `", stringify!($t), "` and advances past it.")]
        pub fn $name(&mut self) -> Result<$t> {
            let mut raw = [0u8; std::mem::size_of::<$t>()];
            self.read_bytes(&mut raw)?;
            Ok(if self.little_endian() {
                <$t>::from_le_bytes(raw)
            } else {
                <$t>::from_be_bytes(raw)
            })
        }
    };
}

macro_rules! write_num {
    ($name:ident, $t:ty) => {
        #[doc = concat!("Writes a `", stringify!($t), "` and advances past it.")]
        pub fn $name(&mut self, value: $t) -> Result<()> {
            let raw = if self.little_endian() {
                value.to_le_bytes()
            } else {
                value.to_be_bytes()
            };
            self.write_bytes(&raw)
        }
    };
}

impl<'a> BufferIter<'a> {
    pub(crate) fn new(buffer: &'a Buffer) -> Self {
        buffer.iterator_opened();
        BufferIter {
            buffer,
            pos: buffer.range().origin,
            bit_offset: 0,
            line_number: 0,
            cached: None,
        }
    }

    /// The buffer this iterator walks.
    pub fn buffer(&self) -> &'a Buffer {
        self.buffer
    }

    /// Absolute offset of the next byte.
    pub fn position(&self) -> i64 {
        self.pos
    }

    /// Bits already consumed from the byte at [`position`](#method.position).
    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    /// Number of newlines written through this iterator.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Moves to `offset` if it lies within the range or at its end.
    /// Returns false, staying put, otherwise.
    pub fn seek(&mut self, offset: i64) -> bool {
        let range = self.buffer.range();
        if offset < range.origin || offset > range.end() {
            return false;
        }
        self.pos = offset;
        self.bit_offset = 0;
        true
    }

    /// Like [`seek`](#method.seek), relative to the current position.
    pub fn seek_relative(&mut self, delta: i64) -> bool {
        self.seek(self.pos + delta)
    }

    /// Moves to the first byte of the range.
    pub fn locate_start(&mut self) {
        self.pos = self.buffer.range().origin;
        self.bit_offset = 0;
    }

    /// Moves just past the last byte, where writes append.
    pub fn locate_end(&mut self) {
        self.pos = self.buffer.range().end();
        self.bit_offset = 0;
    }

    /// Returns true if no byte of the range lies at or after the position.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buffer.range().end()
    }

    /// Ensures and materializes `count` bytes from the current position
    /// without moving.
    pub fn prepare(&mut self, count: usize) -> Result<()> {
        debug_assert!(count > 0, "preparing zero bytes");
        self.buffer.prepare(self.pos, count)?;
        self.refresh();
        Ok(())
    }

    fn little_endian(&self) -> bool {
        self.buffer.endianness().is_little()
    }

    fn check_aligned(&self) -> Result<()> {
        match self.bit_offset {
            0 => Ok(()),
            bit => Err(BufferError::Unaligned { bit }),
        }
    }

    fn refresh(&mut self) {
        self.cached = self
            .buffer
            .part_at(self.pos)
            .map(|(start, part)| Cached {
                generation: self.buffer.generation(),
                start,
                len: part.len(),
                window: part.block().map(|(block, off)| (Rc::downgrade(block), off)),
            });
    }

    /// Returns the block window for `[pos, pos + len)` if the cached part
    /// still covers all of it.
    fn window(&self, len: usize) -> Option<(Rc<MemoryBlock>, usize)> {
        let c = self.cached.as_ref()?;
        if c.generation != self.buffer.generation() {
            return None;
        }
        let skip = self.pos - c.start;
        if skip < 0 || skip as usize + len > c.len {
            return None;
        }
        let (block, off) = c.window.as_ref()?;
        block.upgrade().map(|block| (block, off + skip as usize))
    }

    fn peek_into(&mut self, dst: &mut [u8]) -> Result<()> {
        match self.window(dst.len()) {
            Some((block, off)) => block.read(off, dst),
            None => {
                self.buffer.read_at(self.pos, dst)?;
                self.refresh();
            }
        }
        Ok(())
    }

    /// Fills `dst` from the current position and advances past it.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_aligned()?;
        if dst.is_empty() {
            return Ok(());
        }
        self.peek_into(dst)?;
        self.pos += dst.len() as i64;
        Ok(())
    }

    read_num!(read_u8, u8);
    read_num!(read_u16, u16);
    read_num!(read_u32, u32);
    read_num!(read_u64, u64);
    read_num!(read_i8, i8);
    read_num!(read_i16, i16);
    read_num!(read_i32, i32);
    read_num!(read_i64, i64);
    read_num!(read_f32, f32);
    read_num!(read_f64, f64);

    /// Reads the next bit, least significant first within each byte.
    pub fn read_bit(&mut self) -> Result<bool> {
        let mut byte = [0u8; 1];
        self.peek_into(&mut byte)?;
        let bit = (byte[0] >> self.bit_offset) & 1 == 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.pos += 1;
        }
        Ok(bit)
    }

    /// Reads `count` bits into the low bits of the result; the first bit
    /// read becomes bit 0.
    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        assert!(count <= 32, "cannot read {count} bits into a u32");
        let mut value = 0;
        for i in 0..count {
            if self.read_bit()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    /// Skips the remaining bits of a partially read byte.
    pub fn align_bits(&mut self) {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.pos += 1;
        }
    }

    /// Returns a view of the next `count` bytes and advances past them.
    pub fn read_buffer(&mut self, count: usize) -> Result<Buffer> {
        self.check_aligned()?;
        let range = self.buffer.range();
        let end = self.pos + count as i64;
        if end > range.end() {
            return Err(BufferError::OutOfRange { offset: end, range });
        }
        let view = Buffer::extract(self.buffer, ByteRange::new(self.pos, count));
        self.pos = end;
        Ok(view)
    }

    /// Writes `src` at the current position and advances past it.  Nothing
    /// is written unless all covered memory is writable.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.check_aligned()?;
        if src.is_empty() {
            return Ok(());
        }
        match self.window(src.len()) {
            Some((block, off)) => {
                if !block.write(off, src) {
                    return Err(BufferError::ReadOnly { offset: self.pos });
                }
            }
            None => {
                self.buffer.write_at(self.pos, src)?;
                self.refresh();
            }
        }
        self.pos += src.len() as i64;
        Ok(())
    }

    write_num!(write_u8, u8);
    write_num!(write_u16, u16);
    write_num!(write_u32, u32);
    write_num!(write_u64, u64);
    write_num!(write_i8, i8);
    write_num!(write_i16, i16);
    write_num!(write_i32, i32);
    write_num!(write_i64, i64);
    write_num!(write_f32, f32);
    write_num!(write_f64, f64);

    /// Copies the bytes of `range` in `src` to the current position.
    pub fn write_buffer(&mut self, src: &Buffer, range: ByteRange) -> Result<()> {
        let mut data = vec![0u8; range.len];
        src.read_at(range.origin, &mut data)?;
        self.write_bytes(&data)
    }

    /// Appends `count` bytes copied from `distance` bytes back.  The source
    /// may overlap the bytes being written, repeating them.
    pub fn repeat_bytes(&mut self, distance: usize, count: usize) -> Result<()> {
        let available = self.pos - self.buffer.range().origin;
        if distance == 0 || distance as i64 > available {
            return Err(BufferError::InvalidRepeat { distance, count });
        }

        let mut head = vec![0u8; distance.min(count)];
        self.buffer.read_at(self.pos - distance as i64, &mut head)?;
        let data: Vec<u8> = (0..count).map(|i| head[i % distance]).collect();
        self.write_bytes(&data)
    }

    /// Writes the UTF-8 bytes of `s`.
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Writes the buffer's newline sequence and counts the line.
    pub fn write_newline(&mut self) -> Result<()> {
        self.write_bytes(self.buffer.newline().as_bytes())?;
        self.line_number += 1;
        Ok(())
    }
}

impl Drop for BufferIter<'_> {
    fn drop(&mut self) {
        self.buffer.iterator_closed();
    }
}
