use crate::config::HeapConfig;
use crate::error::HeapError;
use std::cell::Cell;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::trace;

mod key;
pub use key::{HeapKey, HeapOrder, MaxFirst, MinFirst};

/// A back-pointer to an entry of a [`Heap`].
///
/// The handle always holds the current 1-based position of its entry, or 0
/// once the entry has left the heap.  Clones observe the same position.
#[derive(Clone)]
pub struct HeapHandle(Rc<Cell<usize>>);

impl HeapHandle {
    fn new() -> Self {
        HeapHandle(Rc::new(Cell::new(0)))
    }

    /// Returns the 1-based position of the entry, or 0 if it was removed.
    pub fn position(&self) -> usize {
        self.0.get()
    }

    /// Returns true while the entry is still stored in its heap.
    pub fn is_in_heap(&self) -> bool {
        self.position() != 0
    }

    fn same_slot(&self, other: &HeapHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for HeapHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeapHandle({})", self.position())
    }
}

struct Entry<K, T> {
    key: K,
    payload: T,
    slot: Option<HeapHandle>,
}

/// A binary heap of payloads ordered by a separate key.
///
/// The order `O` decides which key sits at the root: [`MinFirst`] (the
/// default) or [`MaxFirst`].  Keys are any [`HeapKey`]: `f64`, `f32`, `i64` or
/// `SystemTime`.
///
/// A heap is either growable or has a fixed capacity.  Growable heaps start
/// with one slot and grow to `2 * capacity + 1` when full; they only shrink
/// when [`shrink_if_necessary`](#method.shrink_if_necessary) is called.
///
/// When configured with back-pointers, entries inserted through
/// [`insert_tracked`](#method.insert_tracked) return a [`HeapHandle`] that
/// allows removing or re-keying that entry in O(log n).
///
/// # Examples
/// ```
/// use lazy_buffers::{HeapConfig, MinHeap};
///
/// let mut heap: MinHeap<i64, &str> = MinHeap::new(HeapConfig::fixed(5));
/// for (key, name) in [(5, "e"), (3, "c"), (8, "h"), (1, "a"), (4, "d")] {
///     heap.insert(name, key).unwrap();
/// }
/// assert_eq!(heap.remove_root(), Some("a"));
/// assert_eq!(heap.remove_root(), Some("c"));
/// ```
pub struct Heap<K, T, O = MinFirst> {
    entries: Vec<Entry<K, T>>,
    capacity: usize,
    growable: bool,
    back_pointers: bool,
    order: PhantomData<O>,
}

/// A heap with the smallest key at the root.
pub type MinHeap<K, T> = Heap<K, T, MinFirst>;

/// A heap with the largest key at the root.
pub type MaxHeap<K, T> = Heap<K, T, MaxFirst>;

impl<K: HeapKey, T, O: HeapOrder> Heap<K, T, O> {
    /// Creates an empty heap.
    pub fn new(config: HeapConfig) -> Self {
        let growable = config.is_growable();
        let capacity = if growable { 1 } else { config.capacity };
        Heap {
            entries: Vec::with_capacity(capacity),
            capacity,
            growable,
            back_pointers: config.back_pointers,
            order: PhantomData,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the heap holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of entries the heap holds before it must grow (or overflow).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if the heap was configured for handles.
    pub fn has_back_pointers(&self) -> bool {
        self.back_pointers
    }

    /// Returns the payload at the root without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.entries.first().map(|e| &e.payload)
    }

    /// Returns the key at the root without removing it.
    pub fn peek_key(&self) -> Option<&K> {
        self.entries.first().map(|e| &e.key)
    }

    /// Returns the payload held by a tracked entry.
    pub fn get(&self, handle: &HeapHandle) -> Option<&T> {
        self.tracked_position(handle).ok().map(|p| &self.at(p).payload)
    }

    /// Iterates the entries in storage order, which is not sorted.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &T)> {
        self.entries.iter().map(|e| (&e.key, &e.payload))
    }

    /// Inserts an untracked entry.
    ///
    /// # Errors
    /// [`HeapError::Overflow`] if the heap has a fixed capacity and is full.
    pub fn insert(&mut self, payload: T, key: K) -> Result<(), HeapError> {
        self.insert_entry(Entry {
            key,
            payload,
            slot: None,
        })
    }

    /// Inserts an entry and returns a handle that follows it around the heap.
    ///
    /// # Examples
    /// ```
    /// use lazy_buffers::{HeapConfig, MaxHeap};
    ///
    /// let cfg = HeapConfig::growable().with_back_pointers();
    /// let mut heap: MaxHeap<f64, char> = MaxHeap::new(cfg);
    /// heap.insert_tracked('a', 1.0).unwrap();
    /// let b = heap.insert_tracked('b', 2.0).unwrap();
    /// assert_eq!(b.position(), 1);
    /// assert_eq!(heap.remove_pos(&b), Ok('b'));
    /// assert!(!b.is_in_heap());
    /// ```
    pub fn insert_tracked(
        &mut self,
        payload: T,
        key: K,
    ) -> Result<HeapHandle, HeapError> {
        if !self.back_pointers {
            return Err(HeapError::BackPointersDisabled);
        }

        let handle = HeapHandle::new();
        self.insert_entry(Entry {
            key,
            payload,
            slot: Some(handle.clone()),
        })?;
        Ok(handle)
    }

    /// Removes and returns the payload at the root.
    pub fn remove_root(&mut self) -> Option<T> {
        self.remove_root_entry().map(|(_, payload)| payload)
    }

    /// Removes the root and returns its key together with the payload.
    pub fn remove_root_entry(&mut self) -> Option<(K, T)> {
        if self.entries.is_empty() {
            return None;
        }
        let e = self.remove_at(1);
        Some((e.key, e.payload))
    }

    /// Removes the tracked entry wherever it currently sits.
    pub fn remove_pos(&mut self, handle: &HeapHandle) -> Result<T, HeapError> {
        let pos = self.tracked_position(handle)?;
        Ok(self.remove_at(pos).payload)
    }

    /// Replaces the key of a tracked entry and restores heap order.
    pub fn update_pos(
        &mut self,
        handle: &HeapHandle,
        key: K,
    ) -> Result<(), HeapError> {
        let pos = self.tracked_position(handle)?;
        self.entries[pos - 1].key = key;
        let pos = self.sift_up(pos);
        self.sift_down(pos);
        self.chk();
        Ok(())
    }

    /// Halves the capacity of a growable heap whose utilization is below 25%.
    pub fn shrink_if_necessary(&mut self) {
        if !self.growable || self.capacity <= 1 {
            return;
        }

        if self.entries.len() * 4 < self.capacity {
            self.capacity /= 2;
            self.entries.shrink_to(self.capacity);
            trace!(capacity = self.capacity, len = self.len(), "heap.shrink");
        }
    }

    /// Drops every entry.  Outstanding handles report "not in heap".
    pub fn clear(&mut self) {
        for e in self.entries.drain(..) {
            if let Some(h) = e.slot {
                h.0.set(0);
            }
        }
    }

    /// Empties the heap into a vector ordered root first.
    pub fn into_sorted_vec(mut self) -> Vec<(K, T)> {
        let mut sorted = Vec::with_capacity(self.len());
        while let Some(kv) = self.remove_root_entry() {
            sorted.push(kv);
        }
        sorted
    }

    fn at(&self, pos: usize) -> &Entry<K, T> {
        &self.entries[pos - 1]
    }

    // publish pos to the back-pointer of the entry stored there
    fn set_slot(&self, pos: usize) {
        if let Some(h) = &self.at(pos).slot {
            h.0.set(pos);
        }
    }

    fn tracked_position(&self, handle: &HeapHandle) -> Result<usize, HeapError> {
        if !self.back_pointers {
            return Err(HeapError::BackPointersDisabled);
        }

        let pos = handle.position();
        if pos == 0 || pos > self.entries.len() {
            return Err(HeapError::NotInHeap);
        }

        match &self.at(pos).slot {
            Some(h) if h.same_slot(handle) => Ok(pos),
            _ => Err(HeapError::NotInHeap),
        }
    }

    fn insert_entry(&mut self, entry: Entry<K, T>) -> Result<(), HeapError> {
        if self.entries.len() == self.capacity {
            if !self.growable {
                return Err(HeapError::Overflow {
                    capacity: self.capacity,
                });
            }
            self.capacity = 2 * self.capacity + 1;
            self.entries.reserve_exact(self.capacity - self.entries.len());
            trace!(capacity = self.capacity, "heap.grow");
        }

        self.entries.push(entry);
        self.sift_up(self.entries.len());
        self.chk();
        Ok(())
    }

    fn remove_at(&mut self, pos: usize) -> Entry<K, T> {
        let removed = self.entries.swap_remove(pos - 1);
        if let Some(h) = &removed.slot {
            h.0.set(0);
        }

        // the former last entry now sits at pos and may need to go either way
        if pos <= self.entries.len() {
            let pos = self.sift_up(pos);
            self.sift_down(pos);
        }

        self.chk();
        removed
    }

    // Moves the entry at pos toward the root while it precedes its parent.
    // Returns its final position.
    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 1 {
            let parent = pos / 2;
            if !O::precedes(&self.at(pos).key, &self.at(parent).key) {
                break;
            }
            self.entries.swap(pos - 1, parent - 1);
            self.set_slot(pos);
            pos = parent;
        }

        self.set_slot(pos);
        pos
    }

    // Moves the entry at pos toward the leaves while a child precedes it.
    fn sift_down(&mut self, mut pos: usize) -> usize {
        let len = self.entries.len();
        loop {
            let left = 2 * pos;
            if left > len {
                break;
            }

            let right = left + 1;
            let child = if right <= len
                && O::precedes(&self.at(right).key, &self.at(left).key)
            {
                right
            } else {
                left
            };

            if !O::precedes(&self.at(child).key, &self.at(pos).key) {
                break;
            }
            self.entries.swap(pos - 1, child - 1);
            self.set_slot(pos);
            pos = child;
        }

        self.set_slot(pos);
        pos
    }

    #[cfg(test)]
    fn chk(&self) {
        for pos in 2..=self.entries.len() {
            let parent = pos / 2;
            assert!(
                !O::precedes(&self.at(pos).key, &self.at(parent).key),
                "child at {pos} precedes its parent"
            );
        }

        for pos in 1..=self.entries.len() {
            if let Some(h) = &self.at(pos).slot {
                assert_eq!(h.position(), pos);
            }
        }

        assert!(self.entries.len() <= self.capacity);
    }

    #[cfg(not(test))]
    fn chk(&self) {}
}

impl<K, T, O> Drop for Heap<K, T, O> {
    fn drop(&mut self) {
        for e in self.entries.iter() {
            if let Some(h) = &e.slot {
                h.0.set(0);
            }
        }
    }
}

impl<K: Debug, T: Debug, O> Debug for Heap<K, T, O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Heap(#{}/{}, ",
            self.entries.len(),
            self.capacity
        ))?;
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.key, &e.payload)))
            .finish()?;
        f.write_str(")")
    }
}
