//! TCP networking implementation.
//!
//! It is split into:
//! - [`listener`]: accepting incoming TCP connections,
//! - [`connection`]: reading and writing established connections.
//!
//! Both types are cheap handles: clones share the same socket, and the
//! socket is closed when [`close`](Connection::close) is called or the
//! last handle is dropped.

pub mod connection;
pub mod listener;

pub use connection::Connection;
pub use listener::Listener;
