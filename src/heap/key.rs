use std::time::SystemTime;

/// A key type that a [`Heap`](super::Heap) can order.
///
/// Both comparisons are strict; equal keys are neither less nor greater.
pub trait HeapKey {
    /// Returns true if `self` orders strictly before `other`.
    fn less(&self, other: &Self) -> bool;
    /// Returns true if `self` orders strictly after `other`.
    fn greater(&self, other: &Self) -> bool;
}

// The four key families supported by the heap.  NaN floats compare false both
// ways and therefore never move.
macro_rules! impl_heap_key {
    ( $( $t:ty ),* ) => {
        $(
            impl HeapKey for $t {
                #[inline]
                fn less(&self, other: &Self) -> bool {
                    self < other
                }

                #[inline]
                fn greater(&self, other: &Self) -> bool {
                    self > other
                }
            }
        )*
    };
}

impl_heap_key!(f64, f32, i64, SystemTime);

/// Selects which of two keys belongs closer to the root.
pub trait HeapOrder {
    /// Returns true if `a` belongs closer to the root than `b`.
    fn precedes<K: HeapKey>(a: &K, b: &K) -> bool;
}

/// Smallest key at the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinFirst;

/// Largest key at the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxFirst;

impl HeapOrder for MinFirst {
    #[inline]
    fn precedes<K: HeapKey>(a: &K, b: &K) -> bool {
        a.less(b)
    }
}

impl HeapOrder for MaxFirst {
    #[inline]
    fn precedes<K: HeapKey>(a: &K, b: &K) -> bool {
        a.greater(b)
    }
}
