//! Networking primitives.
//!
//! This module provides TCP types driven by the runtime reactor. Every
//! operation returns a [`Promise`](crate::Promise) immediately and never
//! blocks the calling thread; the reactor thread performs the socket call
//! once the socket is ready.
//!
//! Entry points are [`ReactorHandle::listen`](crate::ReactorHandle::listen)
//! and [`ReactorHandle::connect`](crate::ReactorHandle::connect).

pub mod tcp;

pub use tcp::{Connection, Listener};
