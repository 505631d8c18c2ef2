//! Lock-free bounded ring buffer and the cursor protocols built on it.
//!
//! - [`cursor`]: monotonically increasing positions.
//! - [`membership`]: aggregates reporting the slowest of several cursors.
//! - [`buffer`]: the ring itself: claim, publish, visibility.
//! - [`consumer`]: single, competing and group consumer handles.

pub mod buffer;
pub mod consumer;
pub mod cursor;
pub mod membership;

pub use buffer::RingBuffer;
pub use consumer::{CompetingConsumer, GroupConsumer, SingleConsumer};
pub(crate) use consumer::IdleGate;
pub use cursor::{AtomicCursor, CursorRead, CursorWrite, OrderedCursor};
pub use membership::{DynamicMembership, StaticMembership};
