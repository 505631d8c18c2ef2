use super::buffer::RingBuffer;
use super::cursor::{AtomicCursor, CursorRead, CursorWrite, OrderedCursor};
use super::membership::StaticMembership;

use std::sync::Arc;

impl<T> RingBuffer<T> {
    /// Registers a lone consumer that sees every published slot.
    pub fn subscribe_single(self: &Arc<Self>) -> SingleConsumer<T> {
        let cursor = Arc::new(OrderedCursor::new());
        self.invite(cursor.clone());

        SingleConsumer {
            ring: self.clone(),
            cursor,
        }
    }

    /// Registers `n` consumers sharing the work: each slot goes to exactly one.
    ///
    /// Subscribe before production starts; consumers begin after the last
    /// position claimed at subscription time.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn subscribe_competing(self: &Arc<Self>, n: usize) -> Vec<CompetingConsumer<T>> {
        assert!(n > 0, "at least one competing consumer is required");

        let start = self.last_claimed();
        let origin = OrderedCursor::with_value(start);
        let shared = Arc::new(AtomicCursor::with_value(start));

        (0..n)
            .map(|_| {
                let private = Arc::new(OrderedCursor::new());
                self.invite_from(&origin, private.clone());

                CompetingConsumer {
                    ring: self.clone(),
                    shared: shared.clone(),
                    private,
                }
            })
            .collect()
    }

    /// Registers `n` consumers that each see every slot.
    ///
    /// The group gates producers as one member, held back by its slowest
    /// consumer.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn subscribe_group(self: &Arc<Self>, n: usize) -> Vec<GroupConsumer<T>>
    where
        T: Sync,
    {
        assert!(n > 0, "a consumer group needs at least one member");

        let cursors: Vec<_> = (0..n).map(|_| Arc::new(OrderedCursor::new())).collect();
        let members = Arc::new(StaticMembership::new(cursors.clone()));
        self.invite(members.clone());

        let gate = Arc::new(GroupGate {
            ring: self.clone(),
            members,
        });

        cursors
            .into_iter()
            .map(|cursor| GroupConsumer {
                ring: self.clone(),
                cursor,
                _gate: gate.clone(),
            })
            .collect()
    }
}

/// The only consumer of a ring, e.g. the reactor draining a request queue.
pub struct SingleConsumer<T> {
    ring: Arc<RingBuffer<T>>,
    cursor: Arc<OrderedCursor>,
}

impl<T> SingleConsumer<T> {
    /// Hands each newly published slot to `f(position, slot, end)`, where
    /// `end` is the last position available in this batch.
    ///
    /// Processing stops early when `f` returns `false`; the slot it was
    /// given still counts as consumed. The cursor is published once, after
    /// the batch. Returns `false` if nothing was available.
    pub fn consume<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(i64, &mut T, i64) -> bool,
    {
        let current = self.cursor.read();
        let claimed = self.ring.last_claimed();
        if claimed <= current {
            return false;
        }

        let end = self.ring.last_published(current + 1, claimed);
        if end <= current {
            return false;
        }

        let mut processed = current;
        for position in current + 1..=end {
            processed = position;

            // Safety: published, and our cursor still gates it.
            let slot = unsafe { self.ring.slot_mut(position) };
            if !f(position, slot, end) {
                break;
            }
        }

        self.cursor.write(processed);
        true
    }

    /// Returns `true` if the next position is published.
    pub fn has_pending(&self) -> bool {
        self.ring.is_published(self.cursor.read() + 1)
    }

    /// The ring this consumer reads from.
    pub fn ring(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }
}

impl<T> Drop for SingleConsumer<T> {
    fn drop(&mut self) {
        self.ring.expel(&self.cursor);
    }
}

/// One of several consumers racing for slots of the same ring.
///
/// Consumers agree on progress through a shared [`AtomicCursor`]. Only their
/// private cursors gate producers: each records the shared position its owner
/// last observed, which is always behind any slot that owner may still be
/// processing.
pub struct CompetingConsumer<T> {
    ring: Arc<RingBuffer<T>>,
    shared: Arc<AtomicCursor>,
    private: Arc<OrderedCursor>,
}

impl<T> CompetingConsumer<T> {
    /// Claims at most one published slot and hands it to `f(position, slot)`.
    ///
    /// Returns `None` when no slot is available. Calling this also releases
    /// the slot handed out by the previous call.
    pub fn consume<F, R>(&mut self, f: F) -> Option<R>
    where
        F: FnOnce(i64, &mut T) -> R,
    {
        loop {
            let current = self.shared.read();
            self.private.write(current);

            let next = current + 1;
            if !self.ring.is_published(next) {
                return None;
            }

            if self.shared.compare_and_swap(current, next) {
                // Safety: we won `next`, and our private cursor sits below it,
                // so no producer can reuse the slot until our next call.
                let slot = unsafe { self.ring.slot_mut(next) };
                return Some(f(next, slot));
            }
        }
    }

    /// Moves this consumer's gate up to the shared position without
    /// claiming anything.
    ///
    /// An idle consumer otherwise keeps gating at the position it last
    /// observed, and once the others are a whole lap ahead producers see
    /// the ring as full. Releasing also gives up the slot handed out by the
    /// previous [`consume`](Self::consume), so call it only between slots.
    pub fn release(&mut self) {
        self.private.write(self.shared.read());
    }

    /// Returns a handle that can release this consumer's gate from another
    /// thread.
    pub(crate) fn idle_gate(&self) -> IdleGate {
        IdleGate {
            shared: self.shared.clone(),
            private: self.private.clone(),
        }
    }

    /// Returns `true` if a published slot is waiting to be claimed.
    pub fn has_pending(&self) -> bool {
        self.ring.is_published(self.shared.read() + 1)
    }

    /// The ring this consumer reads from.
    pub fn ring(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }
}

impl<T> Drop for CompetingConsumer<T> {
    fn drop(&mut self) {
        self.ring.expel(&self.private);
    }
}

/// Remote access to the gate of a [`CompetingConsumer`] that is not running.
pub(crate) struct IdleGate {
    shared: Arc<AtomicCursor>,
    private: Arc<OrderedCursor>,
}

impl IdleGate {
    /// Same as [`CompetingConsumer::release`], from outside the consumer.
    ///
    /// # Safety
    ///
    /// The owning consumer must not be inside
    /// [`consume`](CompetingConsumer::consume) and must not write its
    /// cursor concurrently, e.g. because it is blocked on a lock the caller
    /// holds.
    pub(crate) unsafe fn release(&self) {
        self.private.write(self.shared.read());
    }
}

struct GroupGate<T> {
    ring: Arc<RingBuffer<T>>,
    members: Arc<StaticMembership>,
}

impl<T> Drop for GroupGate<T> {
    fn drop(&mut self) {
        self.ring.expel(&self.members);
    }
}

/// A member of a consumer group: sees every slot, read-only.
pub struct GroupConsumer<T> {
    ring: Arc<RingBuffer<T>>,
    cursor: Arc<OrderedCursor>,
    _gate: Arc<GroupGate<T>>,
}

impl<T: Sync> GroupConsumer<T> {
    /// Hands each newly published slot to `f(position, slot, end)`.
    ///
    /// Same batching rules as [`SingleConsumer::consume`], but slots are
    /// shared with the other members of the group.
    pub fn consume<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(i64, &T, i64) -> bool,
    {
        let current = self.cursor.read();
        let claimed = self.ring.last_claimed();
        if claimed <= current {
            return false;
        }

        let end = self.ring.last_published(current + 1, claimed);
        if end <= current {
            return false;
        }

        let mut processed = current;
        for position in current + 1..=end {
            processed = position;

            // Safety: published, and the group gate holds producers back
            // until every member moves past it.
            let slot = unsafe { self.ring.slot(position) };
            if !f(position, slot, end) {
                break;
            }
        }

        self.cursor.write(processed);
        true
    }

    /// Returns `true` if the next position is published.
    pub fn has_pending(&self) -> bool {
        self.ring.is_published(self.cursor.read() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn single_consumer_sees_everything_in_order() {
        let ring = Arc::new(RingBuffer::new(8, || 0i64));
        let mut consumer = ring.subscribe_single();

        for i in 0..5 {
            assert!(ring.try_produce(|slot| *slot = i * 10).is_ok());
        }

        let mut seen = Vec::new();
        assert!(consumer.consume(|position, slot, end| {
            assert_eq!(end, 4);
            seen.push((position, *slot));
            true
        }));

        assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40)]);
        assert!(!consumer.consume(|_, _, _| true));
    }

    #[test]
    fn single_consumer_can_stop_early() {
        let ring = Arc::new(RingBuffer::new(8, || 0u8));
        let mut consumer = ring.subscribe_single();
        ring.try_produce_batch(3, |_, slot| *slot = 1);

        let mut count = 0;
        consumer.consume(|_, _, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
        assert!(consumer.has_pending());
    }

    #[test]
    fn single_consumer_unblocks_the_producer() {
        let ring = Arc::new(RingBuffer::new(2, || 0u8));
        let mut consumer = ring.subscribe_single();

        assert!(ring.try_produce(|_| {}).is_ok());
        assert!(ring.try_produce(|_| {}).is_ok());
        assert!(ring.try_produce(|_| {}).is_err());

        consumer.consume(|_, _, _| true);
        assert!(ring.try_produce(|_| {}).is_ok());
    }

    #[test]
    fn dropping_a_consumer_releases_the_gate() {
        let ring = Arc::new(RingBuffer::new(2, || 0u8));
        let consumer = ring.subscribe_single();
        assert_eq!(ring.gating_count(), 1);

        drop(consumer);
        assert_eq!(ring.gating_count(), 0);
    }

    #[test]
    fn competing_consumers_split_the_work() {
        let ring = Arc::new(RingBuffer::new(64, || 0i64));
        let consumers = ring.subscribe_competing(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let total = 10_000i64;

        let workers: Vec<_> = consumers
            .into_iter()
            .map(|mut consumer| {
                let seen = seen.clone();
                thread::spawn(move || {
                    let mut local = Vec::new();
                    while (local.len() as i64) < total {
                        match consumer.consume(|_, slot| *slot) {
                            Some(-1) => break,
                            Some(value) => local.push(value),
                            None => thread::yield_now(),
                        }
                    }
                    seen.lock().unwrap().extend(local);
                })
            })
            .collect();

        for value in 0..total {
            let mut fill = move |slot: &mut i64| *slot = value;
            loop {
                match ring.try_produce(fill) {
                    Ok(_) => break,
                    Err(back) => {
                        fill = back;
                        thread::yield_now();
                    }
                }
            }
        }
        for _ in 0..4 {
            while ring.try_produce(|slot| *slot = -1).is_err() {
                thread::yield_now();
            }
        }

        for worker in workers {
            worker.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), total as usize, "every slot consumed once");
        assert_eq!(unique.len(), total as usize);
    }

    #[test]
    fn idle_competing_consumer_can_release_its_gate() {
        let ring = Arc::new(RingBuffer::new(4, || 0u8));
        let mut consumers = ring.subscribe_competing(2);
        let (busy, idle) = consumers.split_at_mut(1);

        // `idle` observes the start position once, then stops consuming.
        assert!(idle[0].consume(|_, _| ()).is_none());

        for _ in 0..4 {
            assert!(ring.try_produce(|_| {}).is_ok());
            assert!(busy[0].consume(|_, _| ()).is_some());
        }
        assert!(!ring.has_capacity(1), "the idle consumer is a lap behind");

        idle[0].release();
        assert!(ring.has_capacity(3), "only the busy consumer's slot is held");

        assert!(ring.try_produce(|_| {}).is_ok());
        assert!(busy[0].consume(|_, _| ()).is_some());
        assert!(ring.try_produce(|_| {}).is_ok());

        // Safety: `idle` is not consuming on any thread.
        unsafe { idle[0].idle_gate().release() };
        assert!(busy[0].consume(|_, _| ()).is_some());
        assert!(ring.has_capacity(3));
    }

    #[test]
    fn group_members_each_see_every_slot() {
        let ring = Arc::new(RingBuffer::new(4, || 0u32));
        let mut group = ring.subscribe_group(2);
        assert_eq!(ring.gating_count(), 1);

        ring.try_produce_batch(4, |position, slot| *slot = position as u32);
        assert!(!ring.has_capacity(1));

        let mut first = Vec::new();
        group[0].consume(|_, slot, _| {
            first.push(*slot);
            true
        });
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert!(!ring.has_capacity(1), "slowest member still gates");

        group[1].consume(|_, _, _| true);
        assert!(ring.has_capacity(4));

        drop(group);
        assert_eq!(ring.gating_count(), 0);
    }
}
