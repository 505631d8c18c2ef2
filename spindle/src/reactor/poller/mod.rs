//! Platform-specific I/O poller abstraction.
//!
//! The poller is used by the reactor to:
//! - wait for socket readiness,
//! - wake the reactor when new commands arrive.
//!
//! Only the Linux `epoll` backend exists. Registrations are one-shot: after
//! reporting an event a socket stays disarmed until the reactor re-arms it
//! with the interest its pending requests call for.

pub(crate) mod common;

pub(crate) use common::{Interest, Waker};

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(target_os = "linux")]
pub(crate) mod unix;

#[cfg(target_os = "linux")]
pub(crate) use unix as platform;
