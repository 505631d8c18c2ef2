//! Core runtime components.
//!
//! This module contains the task-execution side of the runtime:
//! - the [`RuntimeBuilder`](builder::RuntimeBuilder) configuration layer,
//! - the [`Runtime`](core::Runtime) owning the scheduler and the reactor,
//! - the scheduler and its worker threads,
//! - task slots and the [`Dispatch`](job::Dispatch) seam,
//! - delayed and periodic submission driven by reactor timers,
//! - the thread-local transaction context propagated to tasks.

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod job;
pub(crate) mod scheduler;
pub(crate) mod timed;
