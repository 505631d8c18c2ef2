//! Worker pool draining a shared task ring.
//!
//! It is composed of:
//! - [`core`]: the [`Scheduler`] handle, submission and shutdown,
//! - [`worker`]: worker threads and their idle backoff ladder.

pub(crate) mod core;
pub(crate) mod worker;

pub use self::core::{Scheduler, SchedulerConfig};

pub(crate) use self::core::Submitter;
