//! Single-threaded non-blocking socket reactor.
//!
//! One dedicated thread owns the epoll instance and every registered
//! socket, and is the only thread that accepts, connects, reads or writes.
//! Application threads never touch a socket: they push requests into
//! per-socket [`RequestQueue`](queue::RequestQueue)s, send an `Arm`
//! command, and get a [`Promise`](crate::Promise) the reactor settles later.
//!
//! Sockets are registered one-shot. After every event and every `Arm` the
//! reactor serves what it can, then re-arms the socket only for the
//! readiness its queued requests still need, so readiness nobody asked for
//! never spins the loop.
//!
//! The same thread keeps a heap of timers. The earliest deadline bounds
//! each poll, and expired timers run right after the socket events. Timers
//! back [`ReactorHandle::sleep`], [`Promise::deadline`](crate::Promise::deadline)
//! and the delayed and periodic submissions of [`Runtime`](crate::Runtime).
//!
//! Most users reach the reactor through [`ReactorHandle::listen`],
//! [`ReactorHandle::connect`] and the [`net::tcp`](crate::net::tcp) types.

mod command;
mod core;
mod event;
mod io;
mod poller;
mod queue;
mod timer;

pub use self::core::{ReactorConfig, ReactorHandle};

pub(crate) use self::core::Reactor;
pub(crate) use timer::TimerAction;
pub(crate) use io::{ConnectionShared, ListenerShared, ReadRequest, Source, WriteRequest};
