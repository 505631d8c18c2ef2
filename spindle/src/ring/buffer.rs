use super::cursor::{AtomicCursor, CursorRead, CursorWrite, INITIAL};
use super::membership::DynamicMembership;

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// A bounded, pre-allocated ring of slots shared by producers and consumers.
///
/// Producers reserve positions by advancing a shared [`AtomicCursor`]. A
/// position `p` lives in slot `p & (capacity - 1)` during lap
/// `p >> log2(capacity)`; once the producer has filled the slot it records
/// that lap in the availability array, which is the only signal consumers
/// trust. Consumers register gating cursors, and the producer never claims a
/// position more than `capacity` ahead of the slowest one.
///
/// Slots are reused forever: nothing is allocated after construction.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    available: Box<[AtomicI32]>,
    mask: i64,
    shift: u32,
    cursor: AtomicCursor,
    gate_cache: AtomicI64,
    gate: DynamicMembership,
}

// Safety: a slot is touched by exactly one thread per lap, as arbitrated by
// the cursor protocol. Shared `&T` access by group consumers requires
// `T: Sync` at the call site.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a ring of `capacity` slots, each initialised with `init`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new<F>(capacity: usize, mut init: F) -> Self
    where
        F: FnMut() -> T,
    {
        assert!(
            capacity.is_power_of_two(),
            "ring buffer capacity must be a power of two"
        );

        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(init())).collect(),
            available: (0..capacity).map(|_| AtomicI32::new(-1)).collect(),
            mask: capacity as i64 - 1,
            shift: capacity.trailing_zeros(),
            cursor: AtomicCursor::new(),
            gate_cache: AtomicI64::new(INITIAL),
            gate: DynamicMembership::new(),
        }
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn index(&self, position: i64) -> usize {
        (position & self.mask) as usize
    }

    #[inline]
    fn lap(&self, position: i64) -> i32 {
        (position >> self.shift) as i32
    }

    /// Highest position any producer has claimed so far.
    pub fn last_claimed(&self) -> i64 {
        self.cursor.read()
    }

    /// Returns `true` if `n` more positions could be claimed right now.
    pub fn has_capacity(&self, n: usize) -> bool {
        self.fits(self.cursor.read(), n as i64)
    }

    fn fits(&self, current: i64, n: i64) -> bool {
        let wraps_at = current + n - self.capacity() as i64;
        let cached = self.gate_cache.load(Ordering::Relaxed);

        if wraps_at > cached || cached > current {
            let slowest = self.gate.read().min(current);
            self.gate_cache.store(slowest, Ordering::Relaxed);

            if wraps_at > slowest {
                return false;
            }
        }

        true
    }

    /// Reserves `n` contiguous positions and returns the last one.
    ///
    /// Returns `None` without blocking when claiming would overtake the
    /// slowest gating consumer. The caller owns the slots for
    /// `end - n + 1 ..= end` until it publishes them.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero or larger than the capacity.
    pub fn try_claim(&self, n: usize) -> Option<i64> {
        assert!(
            n > 0 && n <= self.capacity(),
            "claim size must be in 1..=capacity"
        );
        let n = n as i64;

        loop {
            let current = self.cursor.read();

            if !self.fits(current, n) {
                return None;
            }

            if self.cursor.compare_and_swap(current, current + n) {
                return Some(current + n);
            }
        }
    }

    /// Makes `from..=to` visible to consumers.
    pub fn publish(&self, from: i64, to: i64) {
        for position in from..=to {
            self.available[self.index(position)].store(self.lap(position), Ordering::Release);
        }
    }

    /// Returns `true` if `position` has been published in its lap.
    pub fn is_published(&self, position: i64) -> bool {
        self.available[self.index(position)].load(Ordering::Acquire) == self.lap(position)
    }

    /// Returns the highest position in `from..=to` such that every position
    /// from `from` up to it is published, or `from - 1` if `from` is not.
    pub fn last_published(&self, from: i64, to: i64) -> i64 {
        (from..=to)
            .find(|&position| !self.is_published(position))
            .map_or(to, |gap| gap - 1)
    }

    /// Claims one slot, fills it with `fill` and publishes it.
    ///
    /// When the ring is full the closure is handed back untouched so the
    /// caller can retry or run it some other way.
    pub fn try_produce<F>(&self, fill: F) -> Result<i64, F>
    where
        F: FnOnce(&mut T),
    {
        let Some(position) = self.try_claim(1) else {
            return Err(fill);
        };

        // Safety: the claim gives this thread exclusive access to the slot
        // until it is published.
        fill(unsafe { self.slot_mut(position) });
        self.publish(position, position);

        Ok(position)
    }

    /// Claims one slot, stores `value` in it and publishes it.
    ///
    /// The value comes back untouched when the ring is full. Whatever the
    /// slot held from its previous lap is dropped.
    pub fn try_publish(&self, value: T) -> Result<i64, T> {
        let Some(position) = self.try_claim(1) else {
            return Err(value);
        };

        // Safety: see `try_produce`.
        unsafe { *self.slot_mut(position) = value };
        self.publish(position, position);

        Ok(position)
    }

    /// Claims `n` slots, fills each with `fill(position, slot)` and publishes
    /// them together. Returns the last position, or `None` if the ring was full.
    pub fn try_produce_batch<F>(&self, n: usize, mut fill: F) -> Option<i64>
    where
        F: FnMut(i64, &mut T),
    {
        let end = self.try_claim(n)?;
        let start = end - n as i64 + 1;

        for position in start..=end {
            // Safety: see `try_produce`.
            fill(position, unsafe { self.slot_mut(position) });
        }
        self.publish(start, end);

        Some(end)
    }

    /// # Safety
    ///
    /// The caller must own `position` for its current lap: either it claimed
    /// it and has not published it yet, or it consumed it and has not
    /// advanced its gating cursor past it.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slot_mut(&self, position: i64) -> &mut T {
        unsafe { &mut *self.slots[self.index(position)].get() }
    }

    /// # Safety
    ///
    /// `position` must be published and not yet released by the calling
    /// consumer's gating cursor; nobody may hold it mutably.
    pub(crate) unsafe fn slot(&self, position: i64) -> &T {
        unsafe { &*self.slots[self.index(position)].get() }
    }

    /// Adds a gating cursor, positioned at the last claimed position.
    pub(crate) fn invite<C>(&self, member: Arc<C>)
    where
        C: CursorWrite + 'static,
    {
        self.gate.invite(&self.cursor, member);
    }

    /// Adds a gating cursor, positioned from `reset_to`.
    pub(crate) fn invite_from<C>(&self, reset_to: &dyn CursorRead, member: Arc<C>)
    where
        C: CursorWrite + 'static,
    {
        self.gate.invite(reset_to, member);
    }

    /// Removes a gating cursor so it no longer holds producers back.
    pub(crate) fn expel<C>(&self, member: &Arc<C>) -> bool
    where
        C: CursorRead + 'static,
    {
        self.gate.expel(member)
    }

    /// Number of registered gating cursors.
    pub fn gating_count(&self) -> usize {
        self.gate.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::cursor::OrderedCursor;

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_capacity() {
        let _ = RingBuffer::new(12, || 0u8);
    }

    #[test]
    fn ungated_ring_never_fills() {
        let ring = RingBuffer::new(4, || 0u64);

        for i in 0..100 {
            assert!(ring.try_produce(|slot| *slot = i).is_ok());
        }
        assert_eq!(ring.last_claimed(), 99);
    }

    #[test]
    fn gated_ring_stops_one_lap_ahead() {
        let ring = RingBuffer::new(4, || 0u64);
        let consumer = Arc::new(OrderedCursor::new());
        ring.invite(consumer.clone());

        for _ in 0..4 {
            assert!(ring.try_claim(1).is_some());
        }
        assert_eq!(ring.try_claim(1), None);
        assert!(!ring.has_capacity(1));

        consumer.write(1);
        assert_eq!(ring.try_claim(2), Some(5));
        assert_eq!(ring.try_claim(1), None);
    }

    #[test]
    fn publication_is_per_lap() {
        let ring = RingBuffer::new(2, || 0u64);

        assert!(!ring.is_published(0));
        let end = ring.try_claim(2).unwrap();
        ring.publish(1, 1);
        assert_eq!(ring.last_published(0, end), -1);

        ring.publish(0, 0);
        assert_eq!(ring.last_published(0, end), 1);

        // position 2 shares slot 0 with position 0, one lap later
        assert!(!ring.is_published(2));
    }

    #[test]
    fn expelled_cursor_stops_gating() {
        let ring = RingBuffer::new(2, || ());
        let consumer = Arc::new(OrderedCursor::new());
        ring.invite(consumer.clone());

        assert!(ring.try_claim(2).is_some());
        assert!(ring.try_claim(1).is_none());

        assert!(ring.expel(&consumer));
        assert_eq!(ring.gating_count(), 0);
        assert!(ring.try_claim(1).is_some());
    }

    #[test]
    fn failed_produce_returns_the_closure() {
        let ring = RingBuffer::new(1, || 0u32);
        ring.invite(Arc::new(OrderedCursor::new()));

        assert_eq!(ring.try_produce(|slot| *slot = 1).ok(), Some(0));
        let rejected = ring.try_produce(|slot| *slot = 2);
        assert!(rejected.is_err());
        assert_eq!(ring.try_publish(3), Err(3));
    }

    #[test]
    fn batch_fills_every_position() {
        let ring = RingBuffer::new(8, || -1i64);

        let end = ring.try_produce_batch(5, |position, slot| *slot = position);
        assert_eq!(end, Some(4));
        assert_eq!(ring.last_published(0, 4), 4);

        for position in 0..5 {
            assert_eq!(unsafe { *ring.slot(position) }, position);
        }
    }
}
