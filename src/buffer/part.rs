use super::block::MemoryBlock;
use std::rc::Rc;

/// One contiguous logical range inside a buffer.
#[derive(Clone, Debug)]
pub(crate) enum BufferPart {
    /// Bytes that have not been materialized yet.
    Sparse(usize),
    /// A window `[offset, offset + len)` into a shared block.
    Filled {
        block: Rc<MemoryBlock>,
        offset: usize,
        len: usize,
    },
}

impl BufferPart {
    pub(crate) fn sparse(len: usize) -> Self {
        assert!(len > 0, "sparse parts must cover at least one byte");
        BufferPart::Sparse(len)
    }

    pub(crate) fn filled(block: Rc<MemoryBlock>, offset: usize, len: usize) -> Self {
        assert!(len > 0, "filled parts must cover at least one byte");
        assert!(
            offset + len <= block.len(),
            "window [{}, {}) exceeds block of {} bytes",
            offset,
            offset + len,
            block.len()
        );
        BufferPart::Filled { block, offset, len }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            BufferPart::Sparse(len) => *len,
            BufferPart::Filled { len, .. } => *len,
        }
    }

    pub(crate) fn is_sparse(&self) -> bool {
        matches!(self, BufferPart::Sparse(_))
    }

    pub(crate) fn block(&self) -> Option<(&Rc<MemoryBlock>, usize)> {
        match self {
            BufferPart::Sparse(_) => None,
            BufferPart::Filled { block, offset, .. } => Some((block, *offset)),
        }
    }

    /// Splits into `[0, at)` and `[at, len)`.  Both halves of a filled part
    /// keep sharing the block.
    pub(crate) fn split_at(&self, at: usize) -> (Self, Self) {
        debug_assert!(0 < at && at < self.len());
        match self {
            BufferPart::Sparse(len) => {
                (BufferPart::sparse(at), BufferPart::sparse(len - at))
            }
            BufferPart::Filled { block, offset, len } => (
                BufferPart::filled(block.clone(), *offset, at),
                BufferPart::filled(block.clone(), offset + at, len - at),
            ),
        }
    }

    /// Returns the sub-window `[start, start + len)` of this part.
    pub(crate) fn slice(&self, start: usize, len: usize) -> Self {
        debug_assert!(start + len <= self.len());
        match self {
            BufferPart::Sparse(_) => BufferPart::sparse(len),
            BufferPart::Filled { block, offset, .. } => {
                BufferPart::filled(block.clone(), offset + start, len)
            }
        }
    }

    /// Divides a sparse part into the pieces before, at and after the target
    /// range `[start, start + len)`.  Lengths always add up to the original.
    pub(crate) fn carve(
        &self,
        start: usize,
        len: usize,
    ) -> (Option<Self>, Self, Option<Self>) {
        debug_assert!(self.is_sparse(), "only sparse parts are carved");
        debug_assert!(len > 0 && start + len <= self.len());
        let rest = self.len() - start - len;
        (
            (start > 0).then(|| BufferPart::sparse(start)),
            BufferPart::sparse(len),
            (rest > 0).then(|| BufferPart::sparse(rest)),
        )
    }

    /// Combines two neighbors if they are both sparse or are contiguous
    /// windows of the same block.
    pub(crate) fn merge(&self, next: &Self) -> Option<Self> {
        match (self, next) {
            (BufferPart::Sparse(a), BufferPart::Sparse(b)) => {
                Some(BufferPart::sparse(a + b))
            }

            (
                BufferPart::Filled { block, offset, len },
                BufferPart::Filled {
                    block: next_block,
                    offset: next_offset,
                    len: next_len,
                },
            ) if Rc::ptr_eq(block, next_block) && offset + len == *next_offset => {
                Some(BufferPart::filled(block.clone(), *offset, len + next_len))
            }

            _ => None,
        }
    }

    /// Replaces a filled window with an unshared copy of its bytes.
    pub(crate) fn detach(&mut self) {
        if let BufferPart::Filled { block, offset, len } = self {
            *block = block.private_copy(*offset, *len);
            *offset = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[should_panic]
    fn empty_sparse_part_panics() {
        BufferPart::sparse(0);
    }

    #[test]
    #[should_panic]
    fn window_outside_block_panics() {
        BufferPart::filled(MemoryBlock::zeroed(4), 2, 3);
    }

    #[test]
    fn carve_preserves_length() {
        let p = BufferPart::sparse(100);
        let (before, target, after) = p.carve(10, 20);
        assert_eq!(before.map(|p| p.len()), Some(10));
        assert_eq!(target.len(), 20);
        assert_eq!(after.map(|p| p.len()), Some(70));

        let (before, target, after) = p.carve(0, 100);
        assert!(before.is_none() && after.is_none());
        assert_eq!(target.len(), 100);
    }

    #[test]
    fn split_shares_block() {
        let block = MemoryBlock::zeroed(10);
        let p = BufferPart::filled(block.clone(), 2, 6);
        let (a, b) = p.split_at(2);
        assert_eq!(a.block().map(|(_, o)| o), Some(2));
        assert_eq!(b.block().map(|(_, o)| o), Some(4));
        assert_eq!(Rc::strong_count(&block), 4);

        let joined = a.merge(&b).unwrap();
        assert_eq!(joined.len(), 6);
        assert!(b.merge(&a).is_none());
    }

    #[test]
    fn sparse_and_filled_do_not_merge() {
        let f = BufferPart::filled(MemoryBlock::zeroed(4), 0, 4);
        assert!(BufferPart::sparse(3).merge(&f).is_none());
        assert_eq!(
            BufferPart::sparse(3).merge(&BufferPart::sparse(4)).map(|p| p.len()),
            Some(7)
        );
    }

    #[test]
    fn detach_copies_window() {
        let block = MemoryBlock::from_vec(b"0123456789".to_vec());
        let mut p = BufferPart::filled(block.clone(), 3, 4);
        p.detach();
        let (copy, offset) = p.block().unwrap();
        assert_eq!(offset, 0);
        assert!(!Rc::ptr_eq(copy, &block));
        copy.with_slice(0, 4, |s| assert_eq!(s, b"3456"));
    }
}
