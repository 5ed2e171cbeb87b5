use bytes::Bytes;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

type ReleaseFn = Box<dyn FnOnce(Vec<u8>)>;

enum Storage {
    Const(Bytes),
    Mutable(RefCell<Vec<u8>>),
}

/// One contiguous, immutably sized allocation shared by buffer parts.
///
/// Blocks are always handled through `Rc<MemoryBlock>`: retaining is
/// `Rc::clone` and releasing is dropping the `Rc`.  When the last holder lets
/// go, an optional release callback receives the bytes of a mutable block.
pub struct MemoryBlock {
    storage: Storage,
    release: Option<ReleaseFn>,
}

impl MemoryBlock {
    /// Allocates a zero-filled mutable block.
    pub fn zeroed(len: usize) -> Rc<Self> {
        Self::from_vec(vec![0; len])
    }

    /// Takes ownership of caller memory as a mutable block.
    pub fn from_vec(data: Vec<u8>) -> Rc<Self> {
        Rc::new(MemoryBlock {
            storage: Storage::Mutable(RefCell::new(data)),
            release: None,
        })
    }

    /// Like [`from_vec`](#method.from_vec), but hands the bytes to `release`
    /// once the block is no longer referenced.
    pub fn from_vec_with_release<F>(data: Vec<u8>, release: F) -> Rc<Self>
    where
        F: FnOnce(Vec<u8>) + 'static,
    {
        Rc::new(MemoryBlock {
            storage: Storage::Mutable(RefCell::new(data)),
            release: Some(Box::new(release)),
        })
    }

    /// Wraps constant memory.  Writes through such a block are rejected.
    pub fn from_bytes(data: Bytes) -> Rc<Self> {
        Rc::new(MemoryBlock {
            storage: Storage::Const(data),
            release: None,
        })
    }

    /// Wraps static constant memory without copying it.
    pub fn from_static(data: &'static [u8]) -> Rc<Self> {
        Self::from_bytes(Bytes::from_static(data))
    }

    /// Size of the block in bytes; it never changes.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Const(b) => b.len(),
            Storage::Mutable(v) => v.borrow().len(),
        }
    }

    /// Returns true for a zero-sized block.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if writes are rejected.
    pub fn is_const(&self) -> bool {
        matches!(self.storage, Storage::Const(_))
    }

    /// Address of the first byte; used for identity checks only.
    pub fn as_ptr(&self) -> *const u8 {
        match &self.storage {
            Storage::Const(b) => b.as_ptr(),
            Storage::Mutable(v) => v.borrow().as_ptr(),
        }
    }

    /// Calls `f` with the bytes `[offset, offset + len)`.
    pub fn with_slice<R, F>(&self, offset: usize, len: usize, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        match &self.storage {
            Storage::Const(b) => f(&b[offset..offset + len]),
            Storage::Mutable(v) => f(&v.borrow()[offset..offset + len]),
        }
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.with_slice(offset, dst.len(), |src| dst.copy_from_slice(src));
    }

    /// Overwrites bytes starting at `offset`.  Returns false, changing
    /// nothing, if the block is constant.
    pub fn write(&self, offset: usize, src: &[u8]) -> bool {
        match &self.storage {
            Storage::Const(_) => false,
            Storage::Mutable(v) => {
                v.borrow_mut()[offset..offset + src.len()].copy_from_slice(src);
                true
            }
        }
    }

    /// Copies a window of this block into a new, unshared mutable block.
    pub fn private_copy(&self, offset: usize, len: usize) -> Rc<Self> {
        Self::from_vec(self.with_slice(offset, len, |s| s.to_vec()))
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Storage::Mutable(v) = &mut self.storage {
                release(std::mem::take(v.get_mut()));
            }
        }
    }
}

impl Debug for MemoryBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "MemoryBlock({} bytes{}, {:p})",
            self.len(),
            if self.is_const() { ", const" } else { "" },
            self.as_ptr()
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn const_blocks_reject_writes() {
        let block = MemoryBlock::from_static(b"ABCDEFGHIJ");
        assert!(block.is_const());
        assert!(!block.write(0, b"x"));

        let mut out = [0u8; 3];
        block.read(3, &mut out);
        assert_eq!(&out, b"DEF");
    }

    #[test]
    fn mutable_blocks_accept_writes() {
        let block = MemoryBlock::zeroed(8);
        assert!(block.write(2, b"hi"));
        block.with_slice(0, 8, |s| assert_eq!(s, b"\0\0hi\0\0\0\0"));
    }

    #[test]
    fn release_runs_once_on_last_drop() {
        let released = Rc::new(Cell::new(0usize));
        let seen = released.clone();
        let block = MemoryBlock::from_vec_with_release(vec![7; 4], move |v| {
            assert_eq!(v, vec![7; 4]);
            seen.set(seen.get() + 1);
        });

        let other = block.clone();
        assert_eq!(Rc::strong_count(&block), 2);
        drop(block);
        assert_eq!(released.get(), 0);
        drop(other);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn private_copy_detaches() {
        let block = MemoryBlock::from_vec(b"abcdef".to_vec());
        let copy = block.private_copy(1, 3);
        assert_eq!(copy.len(), 3);
        assert!(block.write(1, b"X"));
        copy.with_slice(0, 3, |s| assert_eq!(s, b"bcd"));
        assert_ne!(block.as_ptr(), copy.as_ptr());
    }
}
