//! Append-only storage addressed by typed handles.
//!
//! The instruction stream is an [`Arena`] of instructions, the low type
//! registry interns its descriptors in a [`UniqueArena`], and struct layouts
//! (which are never deduplicated) live in a plain [`Arena`]. A [`Range`]
//! names a contiguous run of arena slots, e.g. the body of a closed section.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

fn checked_index(len: usize) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| panic!("arena overflow: {len} slots exceeds u32::MAX"))
}

/// A typed position inside an [`Arena`] or [`UniqueArena`].
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Zero-based slot of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// A half-open run of handles, `[first, end)`.
pub struct Range<T> {
    first: u32,
    end: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Range<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Range<T> {}

impl<T> PartialEq for Range<T> {
    fn eq(&self, other: &Self) -> bool {
        self.first == other.first && self.end == other.end
    }
}

impl<T> Eq for Range<T> {}

impl<T> fmt::Debug for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}..@{}", self.first, self.end)
    }
}

impl<T> Range<T> {
    /// Range covering `first` up to and including `last`.
    pub fn inclusive(first: Handle<T>, last: Handle<T>) -> Self {
        Self {
            first: first.index,
            end: last.index + 1,
            _phantom: PhantomData,
        }
    }

    /// Creates a range from raw slot indices.
    pub fn from_index_range(range: std::ops::Range<u32>) -> Self {
        Self {
            first: range.start,
            end: range.end,
            _phantom: PhantomData,
        }
    }

    /// First handle in the range.
    pub fn first(&self) -> Handle<T> {
        Handle::new(self.first)
    }

    /// Handle one past the last element.
    pub fn end(&self) -> Handle<T> {
        Handle::new(self.end)
    }

    /// Number of slots covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.first) as usize
    }

    /// Returns `true` if the range covers no slots.
    pub fn is_empty(&self) -> bool {
        self.first >= self.end
    }

    /// Returns `true` if `handle` falls inside the range.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        (self.first..self.end).contains(&handle.index)
    }

    /// This range as slot indices.
    pub fn index_range(&self) -> std::ops::Range<usize> {
        self.first as usize..self.end as usize
    }
}

/// An append-only arena.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Creates an arena with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Handle the next appended value will receive.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::new(checked_index(self.data.len()))
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.data.push(value);
        handle
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    pub fn try_get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.data.get_mut(handle.index())
    }

    /// The values covered by `range`, clamped to the arena length.
    pub fn slice(&self, range: Range<T>) -> &[T] {
        let r = range.index_range();
        let end = r.end.min(self.data.len());
        let start = r.start.min(end);
        &self.data[start..end]
    }

    /// Iterates over `(handle, &value)` pairs in append order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Handle<T>, &T)> {
        // Length bounded by u32::MAX, enforced in append.
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    /// Keeps only the values for which `keep` returns `true`.
    ///
    /// Returns the new handle of every old slot, or `None` for dropped ones.
    pub fn compact(&mut self, mut keep: impl FnMut(Handle<T>, &T) -> bool) -> Vec<Option<Handle<T>>> {
        let mut moved = Vec::with_capacity(self.data.len());
        let mut kept = 0u32;
        let old = std::mem::take(&mut self.data);
        for (i, value) in old.into_iter().enumerate() {
            if keep(Handle::new(i as u32), &value) {
                moved.push(Some(Handle::new(kept)));
                self.data.push(value);
                kept += 1;
            } else {
                moved.push(None);
            }
        }
        moved
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

/// An arena that hands out the same [`Handle`] for equal values.
#[derive(Clone, Debug)]
pub struct UniqueArena<T> {
    data: Vec<T>,
    map: HashMap<T, u32>,
}

impl<T: Hash + Eq> Default for UniqueArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq> UniqueArena<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            map: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Interns `value`, returning the existing handle when an equal value is
    /// already present. The flag is `true` when the value was new.
    pub fn insert_full(&mut self, value: T) -> (Handle<T>, bool)
    where
        T: Clone,
    {
        if let Some(&index) = self.map.get(&value) {
            return (Handle::new(index), false);
        }
        let index = checked_index(self.data.len());
        self.map.insert(value.clone(), index);
        self.data.push(value);
        (Handle::new(index), true)
    }

    /// Interns `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> Handle<T>
    where
        T: Clone,
    {
        self.insert_full(value).0
    }

    /// Looks up an equal value without interning it.
    pub fn get_handle(&self, value: &T) -> Option<Handle<T>> {
        self.map.get(value).map(|&index| Handle::new(index))
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }
}

impl<T> Index<Handle<T>> for UniqueArena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_hands_out_sequential_handles() {
        let mut arena = Arena::new();
        let a = arena.append("label");
        let b = arena.append("jump");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[b], "jump");
        assert_eq!(arena.next_handle().index(), 2);
    }

    #[test]
    fn arena_compact_reports_moves() {
        let mut arena = Arena::new();
        for v in [10, 11, 12, 13] {
            arena.append(v);
        }
        let moved = arena.compact(|_, v| v % 2 == 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(moved[0], None);
        assert_eq!(moved[1].map(Handle::index), Some(0));
        assert_eq!(moved[3].map(Handle::index), Some(1));
        assert_eq!(arena[Handle::new(1)], 13);
    }

    #[test]
    fn arena_slice_clamps() {
        let mut arena = Arena::new();
        arena.append(1);
        arena.append(2);
        let range = Range::from_index_range(1..5);
        assert_eq!(arena.slice(range), &[2]);
    }

    #[test]
    fn unique_arena_interns_equal_values() {
        let mut arena = UniqueArena::new();
        let (f32_handle, fresh) = arena.insert_full(("float", 32));
        assert!(fresh);
        let i32_handle = arena.insert(("int", 32));
        let (again, fresh) = arena.insert_full(("float", 32));
        assert!(!fresh);
        assert_eq!(f32_handle, again);
        assert_ne!(f32_handle, i32_handle);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get_handle(&("int", 32)), Some(i32_handle));
        assert_eq!(arena.get_handle(&("int", 64)), None);
    }

    #[test]
    fn range_bounds() {
        let range = Range::<u8>::inclusive(Handle::new(2), Handle::new(4));
        assert_eq!(range.len(), 3);
        assert!(range.contains(Handle::new(4)));
        assert!(!range.contains(Handle::new(5)));
        assert!(Range::<u8>::from_index_range(3..3).is_empty());
    }
}
