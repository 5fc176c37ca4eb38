use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice::SliceIndex;

use serde::Serialize;

/// Smallest capacity allocated on first growth.
pub const MIN_CAPACITY: usize = 8;

/// Growable array with doubling growth and order preserving removal.
///
/// Capacity only grows; [Vect::clear] and [Vect::truncate] keep the
/// allocation around for reuse.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Vect<T> {
    items: Vec<T>,
}

impl<T> Vect<T> {
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Ensure room for `additional` more items, doubling the capacity until
    /// it fits.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.items.len() + additional;
        if required <= self.items.capacity() {
            return;
        }
        let mut capacity = self.items.capacity().max(MIN_CAPACITY);
        while capacity < required {
            capacity *= 2;
        }
        self.items.reserve_exact(capacity - self.items.len());
    }

    pub fn push(&mut self, item: T) {
        self.reserve(1);
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Insert `item` at `idx`, shifting the tail right.
    ///
    /// Panics if `idx > len`.
    pub fn insert(&mut self, idx: usize, item: T) {
        assert!(idx <= self.len(), "Vect insert index {idx} out of bounds");
        self.reserve(1);
        self.items.insert(idx, item);
    }

    /// Insert a block of items at `idx` with a single tail move.
    pub fn insert_n<I>(&mut self, idx: usize, items: I)
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        assert!(idx <= self.len(), "Vect insert index {idx} out of bounds");
        let items = items.into_iter();
        self.reserve(items.len());
        self.items.splice(idx..idx, items);
    }

    /// Remove the item at `idx` keeping the order of the others.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        (idx < self.len()).then(|| self.items.remove(idx))
    }

    /// Remove `count` items starting at `idx`, clipped to the length.
    pub fn remove_n(&mut self, idx: usize, count: usize) -> usize {
        if idx >= self.len() {
            return 0;
        }
        let end = idx.saturating_add(count).min(self.len());
        self.items.drain(idx..end);
        end - idx
    }

    /// Replace the item at `idx`, returning the previous one.
    pub fn set(&mut self, idx: usize, item: T) -> Option<T> {
        self.items
            .get_mut(idx)
            .map(|slot| std::mem::replace(slot, item))
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.items.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.items.get_mut(idx)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Keep the items matching `keep`, in order.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone> Vect<T> {
    /// Grow or shrink to `len` items, filling with `value`.
    pub fn resize(&mut self, len: usize, value: T) {
        if len > self.len() {
            self.reserve(len - self.len());
        }
        self.items.resize(len, value);
    }
}

impl<T> Default for Vect<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for Vect<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> DerefMut for Vect<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T, I: SliceIndex<[T]>> Index<I> for Vect<T> {
    type Output = I::Output;

    fn index(&self, idx: I) -> &Self::Output {
        &self.items[idx]
    }
}

impl<T, I: SliceIndex<[T]>> IndexMut<I> for Vect<T> {
    fn index_mut(&mut self, idx: I) -> &mut Self::Output {
        &mut self.items[idx]
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Vect<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T> Extend<T> for Vect<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<T> FromIterator<T> for Vect<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut vect = Vect::new();
        vect.extend(iter);
        vect
    }
}

impl<T> From<Vec<T>> for Vect<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> IntoIterator for Vect<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Vect<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn growth_doubles_from_minimum() {
        let mut vect = Vect::new();
        assert_eq!(vect.capacity(), 0);
        vect.push(1u8);
        assert_eq!(vect.capacity(), MIN_CAPACITY);
        for i in 0..8 {
            vect.push(i);
        }
        assert_eq!(vect.capacity(), MIN_CAPACITY * 2);
    }

    #[test]
    fn insert_and_remove_keep_order() {
        let mut vect: Vect<u32> = (0..5).collect();
        vect.insert(2, 99);
        assert_eq!(vect.as_slice(), &[0, 1, 99, 2, 3, 4]);
        assert_eq!(vect.remove(2), Some(99));
        assert_eq!(vect.as_slice(), &[0, 1, 2, 3, 4]);
        assert_eq!(vect.remove(10), None);
        vect.insert(5, 5);
        assert_eq!(vect.last(), Some(&5));
    }

    #[test]
    fn block_insert_and_remove() {
        let mut vect: Vect<u32> = vec![0, 1, 5].into();
        vect.insert_n(2, [2, 3, 4]);
        assert_eq!(vect.as_slice(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(vect.remove_n(1, 2), 2);
        assert_eq!(vect.as_slice(), &[0, 3, 4, 5]);
        assert_eq!(vect.remove_n(3, 100), 1);
        assert_eq!(vect.remove_n(9, 1), 0);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut vect: Vect<u64> = (0..100).collect();
        let capacity = vect.capacity();
        vect.truncate(3);
        vect.clear();
        assert!(vect.is_empty());
        assert_eq!(vect.capacity(), capacity);
    }

    #[test]
    fn set_returns_previous() {
        let mut vect: Vect<&str> = vec!["a", "b"].into();
        assert_eq!(vect.set(1, "c"), Some("b"));
        assert_eq!(vect.set(2, "d"), None);
        assert_eq!(vect[1], "c");
    }

    #[test]
    fn retain_and_ranges() {
        let mut vect: Vect<u32> = (0..10).collect();
        vect.retain(|item| item % 3 != 0);
        assert_eq!(vect.as_slice(), &[1, 2, 4, 5, 7, 8]);
        assert_eq!(&vect[2..4], &[4, 5]);
        assert_eq!(&vect[4..], &[7, 8]);
        vect[..2].copy_from_slice(&[10, 20]);
        assert_eq!(vect[1], 20);
    }

    #[test]
    #[should_panic]
    fn insert_past_end_panics() {
        let mut vect: Vect<u8> = Vect::new();
        vect.insert(1, 0);
    }
}
