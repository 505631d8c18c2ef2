/// A simple slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and
/// returns stable indices that can be reused after removal.
///
/// The reactor uses the indices as epoll tokens, so a token stays valid
/// exactly as long as its entry is present. Because freed indices are
/// reused, callers that hold on to a token must check that the entry they
/// find is still the one they registered.
pub(crate) struct Slab<T> {
    /// Storage for items; `None` marks a free slot.
    entries: Vec<Option<T>>,

    /// Stack of free indices that can be reused.
    free: Vec<usize>,

    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new, empty `Slab` with room for `capacity` entries.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let slab = Slab::<i32>::with_capacity(16);
    /// ```
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Returns the index the next [`insert`](Self::insert) will use.
    ///
    /// This lets a value embed its own index before it is stored.
    pub(crate) fn vacant_key(&self) -> usize {
        self.free.last().copied().unwrap_or(self.entries.len())
    }

    /// Inserts a value into the slab and returns its index.
    ///
    /// If a free slot is available, it is reused.
    /// Otherwise, the slab grows by one slot.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mut slab = Slab::with_capacity(1);
    /// let idx = slab.insert(42);
    /// assert_eq!(slab.get(idx), Some(&42));
    /// ```
    pub(crate) fn insert(&mut self, item: T) -> usize {
        self.len += 1;

        match self.free.pop() {
            Some(index) => {
                self.entries[index] = Some(item);
                index
            }
            None => {
                self.entries.push(Some(item));
                self.entries.len() - 1
            }
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index).and_then(Option::as_mut)
    }

    /// Removes and returns the value stored at `index`, if any.
    ///
    /// The slot becomes free and may be reused by future insertions.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.entries.get_mut(index)?.take()?;

        self.free.push(index);
        self.len -= 1;

        Some(item)
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Removes every value, yielding them with their index.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (usize, T)> + '_ {
        self.free.clear();
        self.len = 0;

        self.entries
            .drain(..)
            .enumerate()
            .filter_map(|(index, item)| item.map(|item| (index, item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_indices_are_reused() {
        let mut slab = Slab::with_capacity(2);

        let a = slab.insert("a");
        let b = slab.insert("b");
        assert_ne!(a, b);

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.remove(a), None, "double remove is harmless");
        assert_eq!(slab.vacant_key(), a);

        let c = slab.insert("c");
        assert_eq!(c, a);
        assert_eq!(slab.get(c), Some(&"c"));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn vacant_key_predicts_insert() {
        let mut slab = Slab::with_capacity(0);

        for _ in 0..4 {
            let expected = slab.vacant_key();
            assert_eq!(slab.insert(()), expected);
        }
    }

    #[test]
    fn drain_empties_the_slab() {
        let mut slab = Slab::with_capacity(4);
        slab.insert(1);
        let middle = slab.insert(2);
        slab.insert(3);
        slab.remove(middle);

        let drained: Vec<_> = slab.drain().collect();
        assert_eq!(drained, vec![(0, 1), (2, 3)]);
        assert_eq!(slab.len(), 0);
        assert_eq!(slab.vacant_key(), 0);
        assert!(slab.get_mut(0).is_none());
    }
}
