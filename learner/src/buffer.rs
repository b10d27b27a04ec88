//! An amortized-growth contiguous sequence reused across examples.

use std::{
    error::Error,
    fmt::{self, Display},
    ops::{Deref, DerefMut},
};

/// Error returned when reading past the front of an empty `GrowableBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferErr {
    Underflow,
}

impl Display for BufferErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferErr::Underflow => f.write_str("buffer underflow: the buffer is empty"),
        }
    }
}

impl Error for BufferErr {}

/// A growable sequence whose storage survives `erase`.
///
/// Growth follows `2 * capacity + 3` so the number of reallocations stays
/// logarithmic even when starting from an empty buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowableBuffer<T> {
    items: Vec<T>,
}

impl<T> Default for GrowableBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GrowableBuffer<T> {
    /// Creates a new empty `GrowableBuffer` without allocating.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Creates a new empty `GrowableBuffer` with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    fn grow_to(&mut self, wanted: usize) {
        let cap = self.items.capacity();
        if wanted > cap {
            let target = wanted.max(2 * cap + 3);
            self.items.reserve_exact(target - self.items.len());
        }
    }

    /// Guarantees room for at least `n` items without changing the length.
    ///
    /// # Arguments
    /// * `n` - The minimum capacity required.
    pub fn reserve(&mut self, n: usize) {
        self.grow_to(n);
    }

    /// Appends `item` to the end of the buffer.
    ///
    /// # Arguments
    /// * `item` - The value to append.
    pub fn push(&mut self, item: T) {
        self.grow_to(self.items.len() + 1);
        self.items.push(item);
    }

    /// Removes and returns the last item.
    ///
    /// # Errors
    /// `BufferErr::Underflow` if the buffer is empty.
    pub fn pop(&mut self) -> Result<T, BufferErr> {
        self.items.pop().ok_or(BufferErr::Underflow)
    }

    /// Returns a reference to the last item.
    ///
    /// # Errors
    /// `BufferErr::Underflow` if the buffer is empty.
    pub fn last(&self) -> Result<&T, BufferErr> {
        self.items.last().ok_or(BufferErr::Underflow)
    }

    /// Returns a mutable reference to the last item.
    ///
    /// # Errors
    /// `BufferErr::Underflow` if the buffer is empty.
    pub fn last_mut(&mut self) -> Result<&mut T, BufferErr> {
        self.items.last_mut().ok_or(BufferErr::Underflow)
    }

    /// Resets the length to zero, keeping the allocated storage.
    pub fn erase(&mut self) {
        self.items.clear();
    }

    /// Shortens the buffer to `len` items, keeping the allocated storage.
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    /// Keeps only the items for which `keep` returns true, in order.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    /// Moves every item out of the buffer, keeping the allocated storage.
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.items.drain(..)
    }

    /// Returns the amount of items the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T: Clone> GrowableBuffer<T> {
    /// Appends every item of `items`, growing at most once.
    ///
    /// # Arguments
    /// * `items` - The values to append, in order.
    pub fn push_many(&mut self, items: &[T]) {
        self.grow_to(self.items.len() + items.len());
        self.items.extend_from_slice(items);
    }
}

impl<T: Default> GrowableBuffer<T> {
    /// Extends the buffer to `n` items, filling the new slots with
    /// `T::default()` so that they can be written through indexing.
    ///
    /// A buffer already holding `n` items or more is left untouched.
    pub fn resize_default(&mut self, n: usize) {
        self.grow_to(n);
        if self.items.len() < n {
            self.items.resize_with(n, T::default);
        }
    }
}

impl<T> Deref for GrowableBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl<T> DerefMut for GrowableBuffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.items
    }
}

impl<T> From<Vec<T>> for GrowableBuffer<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> FromIterator<T> for GrowableBuffer<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a GrowableBuffer<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut GrowableBuffer<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter_mut()
    }
}
