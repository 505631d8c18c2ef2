//! Small data structures used internally by the runtime.
//!
//! In particular, it exposes a [`Slab`] used by the reactor to map epoll
//! tokens to registered sockets.

mod slab;

pub(crate) use slab::Slab;
