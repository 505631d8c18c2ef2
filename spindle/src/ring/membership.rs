use super::cursor::{CursorRead, CursorWrite, OrderedCursor};

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Members = Box<[Arc<dyn CursorRead>]>;

/// A read cursor reporting the slowest of a changing set of cursors.
///
/// Membership changes publish a fresh immutable array with a CAS loop, so
/// readers never take a lock. A replaced array moves to a retired list, and
/// the list is freed by the next membership change that finds no reader
/// mid-scan. At most the arrays replaced since the last quiet moment are
/// kept, along with the `Arc`s of expelled cursors inside them.
///
/// An empty membership reads as `i64::MAX`, i.e. it holds nobody back.
pub struct DynamicMembership {
    members: AtomicPtr<Members>,

    /// Threads currently scanning an array, current or retired.
    readers: AtomicUsize,

    retired: Mutex<Vec<Box<Members>>>,
}

/// Keeps every array reachable when it was taken alive until dropped.
struct Pinned<'a> {
    membership: &'a DynamicMembership,
    members: *mut Members,
}

impl Pinned<'_> {
    fn members(&self) -> &[Arc<dyn CursorRead>] {
        // Safety: the reader count was raised before `members` was loaded,
        // so `reclaim` cannot free it while this guard lives.
        unsafe { &**self.members }
    }
}

impl Drop for Pinned<'_> {
    fn drop(&mut self) {
        self.membership.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DynamicMembership {
    /// Creates an empty membership.
    pub fn new() -> Self {
        let empty: Members = Box::new([]);

        Self {
            members: AtomicPtr::new(Box::into_raw(Box::new(empty))),
            readers: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }

    fn pin(&self) -> Pinned<'_> {
        self.readers.fetch_add(1, Ordering::SeqCst);

        Pinned {
            membership: self,
            members: self.members.load(Ordering::SeqCst),
        }
    }

    /// Returns the number of current members.
    pub fn len(&self) -> usize {
        self.pin().members().len()
    }

    /// Returns `true` if nobody is a member.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `member`, first resetting it to the position of `reset_to`.
    ///
    /// The reset is written inside the CAS loop and once more after the
    /// new array is published, so a member joining while `reset_to` moves
    /// ends up no further behind than `reset_to` was when it became visible.
    pub fn invite<C>(&self, reset_to: &dyn CursorRead, member: Arc<C>)
    where
        C: CursorWrite + 'static,
    {
        let entry: Arc<dyn CursorRead> = member.clone();

        loop {
            let pinned = self.pin();
            let members = pinned.members();

            member.write(reset_to.read());

            let mut updated = Vec::with_capacity(members.len() + 1);
            updated.extend(members.iter().cloned());
            updated.push(entry.clone());

            if self.publish(&pinned, updated) {
                break;
            }
        }

        member.write(reset_to.read());
        self.reclaim();
    }

    /// Removes `member`. Returns `false` if it was not a member.
    pub fn expel<C>(&self, member: &Arc<C>) -> bool
    where
        C: CursorRead + 'static,
    {
        let target = Arc::as_ptr(member) as *const ();

        loop {
            let pinned = self.pin();
            let members = pinned.members();

            let remaining: Vec<_> = members
                .iter()
                .filter(|m| !ptr::eq(Arc::as_ptr(m) as *const (), target))
                .cloned()
                .collect();

            if remaining.len() == members.len() {
                return false;
            }

            if self.publish(&pinned, remaining) {
                break;
            }
        }

        self.reclaim();
        true
    }

    /// Tries to swap the pinned array for `updated`; on success the old
    /// array is retired.
    fn publish(&self, pinned: &Pinned<'_>, updated: Vec<Arc<dyn CursorRead>>) -> bool {
        let fresh = Box::into_raw(Box::new(updated.into_boxed_slice()));

        match self
            .members
            .compare_exchange(pinned.members, fresh, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(old) => {
                // Safety: `old` came from `Box::into_raw` and is no longer
                // reachable through `members`; readers that still hold it
                // are counted in `readers`.
                let old = unsafe { Box::from_raw(old) };
                self.retired
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(old);
                true
            }
            Err(_) => {
                // Safety: `fresh` was never shared.
                drop(unsafe { Box::from_raw(fresh) });
                false
            }
        }
    }

    /// Frees the retired arrays if nobody is scanning any array right now.
    ///
    /// Every retired array was swapped out before this check. A reader
    /// raises the count before loading the pointer, so a count of zero
    /// means no reader still holds one of them.
    fn reclaim(&self) {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);

        if !retired.is_empty() && self.readers.load(Ordering::SeqCst) == 0 {
            retired.clear();
        }
    }

    #[cfg(test)]
    fn retired(&self) -> usize {
        self.retired.lock().unwrap().len()
    }
}

impl Default for DynamicMembership {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorRead for DynamicMembership {
    fn read(&self) -> i64 {
        self.pin()
            .members()
            .iter()
            .map(|cursor| cursor.read())
            .min()
            .unwrap_or(i64::MAX)
    }
}

impl Drop for DynamicMembership {
    fn drop(&mut self) {
        let current = *self.members.get_mut();
        // Safety: `&mut self` means no reader is left. Retired arrays are
        // dropped with the list.
        drop(unsafe { Box::from_raw(current) });
    }
}

/// A read cursor reporting the slowest of a fixed set of cursors.
///
/// Writing to it resets every member, which is how a whole group is
/// positioned when it is invited into a [`DynamicMembership`].
pub struct StaticMembership {
    members: Box<[Arc<OrderedCursor>]>,
}

impl StaticMembership {
    /// Aggregates `members`. The set never changes afterwards.
    pub fn new(members: Vec<Arc<OrderedCursor>>) -> Self {
        assert!(!members.is_empty(), "a static membership needs members");

        Self {
            members: members.into_boxed_slice(),
        }
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always `false`: construction rejects empty sets.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl CursorRead for StaticMembership {
    fn read(&self) -> i64 {
        self.members
            .iter()
            .map(|cursor| cursor.read())
            .min()
            .unwrap_or(i64::MAX)
    }
}

impl CursorWrite for StaticMembership {
    fn write(&self, value: i64) {
        for member in self.members.iter() {
            member.write(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::cursor::AtomicCursor;

    #[test]
    fn empty_membership_holds_nobody_back() {
        let membership = DynamicMembership::new();
        assert!(membership.is_empty());
        assert_eq!(membership.read(), i64::MAX);
    }

    #[test]
    fn reports_the_slowest_member() {
        let origin = AtomicCursor::with_value(3);
        let membership = DynamicMembership::new();

        let a = Arc::new(OrderedCursor::new());
        let b = Arc::new(OrderedCursor::new());
        membership.invite(&origin, a.clone());
        membership.invite(&origin, b.clone());

        assert_eq!(a.read(), 3);
        assert_eq!(membership.read(), 3);

        a.write(10);
        b.write(7);
        assert_eq!(membership.read(), 7);
        assert_eq!(membership.len(), 2);
    }

    #[test]
    fn expel_removes_only_the_given_member() {
        let origin = AtomicCursor::new();
        let membership = DynamicMembership::new();

        let slow = Arc::new(OrderedCursor::new());
        let fast = Arc::new(OrderedCursor::new());
        membership.invite(&origin, slow.clone());
        membership.invite(&origin, fast.clone());
        fast.write(20);

        assert!(membership.expel(&slow));
        assert!(!membership.expel(&slow));
        assert_eq!(membership.read(), 20);
    }

    #[test]
    fn static_membership_resets_every_member() {
        let members: Vec<_> = (0..3).map(|_| Arc::new(OrderedCursor::new())).collect();
        let group = StaticMembership::new(members.clone());

        group.write(4);
        members[1].write(9);
        assert_eq!(group.read(), 4);

        members[0].write(9);
        members[2].write(6);
        assert_eq!(group.read(), 6);
    }

    #[test]
    fn concurrent_invites_all_land() {
        let origin = Arc::new(AtomicCursor::new());
        let membership = Arc::new(DynamicMembership::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let origin = origin.clone();
                let membership = membership.clone();
                std::thread::spawn(move || {
                    for _ in 0..16 {
                        membership.invite(&*origin, Arc::new(OrderedCursor::new()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(membership.len(), 128);
    }

    #[test]
    fn replaced_arrays_are_freed_when_nobody_reads() {
        let origin = AtomicCursor::new();
        let membership = DynamicMembership::new();
        let cursor = Arc::new(OrderedCursor::new());

        for _ in 0..100 {
            membership.invite(&origin, cursor.clone());
            assert!(membership.expel(&cursor));
        }

        assert_eq!(membership.retired(), 0);
        assert_eq!(
            Arc::strong_count(&cursor),
            1,
            "expelled cursors are not kept alive by old arrays"
        );
    }

    #[test]
    fn pinned_readers_keep_replaced_arrays() {
        let origin = AtomicCursor::new();
        let membership = DynamicMembership::new();
        let first = Arc::new(OrderedCursor::new());
        membership.invite(&origin, first.clone());

        let pinned = membership.pin();
        membership.invite(&origin, Arc::new(OrderedCursor::new()));
        assert!(membership.expel(&first));

        assert_eq!(membership.retired(), 2);
        assert_eq!(pinned.members().len(), 1, "old array still readable");
        drop(pinned);

        membership.invite(&origin, Arc::new(OrderedCursor::new()));
        assert_eq!(membership.retired(), 0);
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn reads_during_membership_churn() {
        let origin = Arc::new(AtomicCursor::new());
        let membership = Arc::new(DynamicMembership::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let membership = membership.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let value = membership.read();
                        assert!(value == i64::MAX || value == -1);
                    }
                })
            })
            .collect();

        let cursors: Vec<_> = (0..4).map(|_| Arc::new(OrderedCursor::new())).collect();
        for _ in 0..500 {
            for cursor in &cursors {
                membership.invite(&*origin, cursor.clone());
            }
            for cursor in &cursors {
                assert!(membership.expel(cursor));
            }
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        assert!(membership.is_empty());
    }
}
