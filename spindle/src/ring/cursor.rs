use std::sync::atomic::{AtomicI64, Ordering};

/// Position every cursor starts from: nothing produced or consumed yet.
pub const INITIAL: i64 = -1;

/// Read side of a cursor.
///
/// A cursor is a monotonically increasing position through a ring buffer.
/// Once a reader observes a value, no later read returns a smaller one.
pub trait CursorRead: Send + Sync {
    /// Reads the current position with acquire ordering.
    fn read(&self) -> i64;
}

/// Write side of a cursor.
///
/// Writes publish with release ordering so that everything the writer did
/// to the slots up to `value` is visible to whoever reads the new position.
pub trait CursorWrite: CursorRead {
    /// Publishes a new position. Must not move the cursor backwards.
    fn write(&self, value: i64);
}

/// A cursor owned by a single logical writer.
///
/// Publishing is a plain release store, no read-modify-write.
#[derive(Debug)]
#[repr(align(128))]
pub struct OrderedCursor {
    value: AtomicI64,
}

impl OrderedCursor {
    /// Creates a cursor positioned at [`INITIAL`].
    pub fn new() -> Self {
        Self::with_value(INITIAL)
    }

    /// Creates a cursor positioned at `value`.
    pub fn with_value(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }
}

impl Default for OrderedCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorRead for OrderedCursor {
    fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

impl CursorWrite for OrderedCursor {
    fn write(&self, value: i64) {
        debug_assert!(
            value >= self.value.load(Ordering::Relaxed),
            "cursor moved backwards"
        );

        self.value.store(value, Ordering::Release);
    }
}

/// A cursor that several uncoordinated writers may advance.
///
/// Writers race with [`compare_and_swap`](Self::compare_and_swap); exactly
/// one of them wins each step.
#[derive(Debug)]
#[repr(align(128))]
pub struct AtomicCursor {
    value: AtomicI64,
}

impl AtomicCursor {
    /// Creates a cursor positioned at [`INITIAL`].
    pub fn new() -> Self {
        Self::with_value(INITIAL)
    }

    /// Creates a cursor positioned at `value`.
    pub fn with_value(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    /// Moves the cursor from `current` to `next` if nobody else moved it first.
    pub fn compare_and_swap(&self, current: i64, next: i64) -> bool {
        self.value
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorRead for AtomicCursor {
    fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

impl CursorWrite for AtomicCursor {
    fn write(&self, value: i64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }
}
