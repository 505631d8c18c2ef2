use crate::promise::Promise;
use crate::reactor::{ConnectionShared, ReactorHandle, ReadRequest, Source, WriteRequest};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// An established TCP connection served by the reactor.
///
/// Obtained from [`Listener::accept`](super::Listener::accept) or
/// [`ReactorHandle::connect`]. Clones share the same socket.
///
/// Reads are served in submission order, and so are writes; the two
/// directions are independent. A read or write that the socket cannot
/// complete yet stays in flight and resumes when the socket is ready.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Owner>,
}

/// Closes the socket when the last handle goes away.
struct Owner {
    shared: Arc<ConnectionShared>,
    reactor: ReactorHandle,
}

impl Drop for Owner {
    fn drop(&mut self) {
        let _ = self
            .reactor
            .close(Source::Connection(self.shared.clone()));
    }
}

impl Connection {
    pub(crate) fn new(shared: Arc<ConnectionShared>, reactor: ReactorHandle) -> Self {
        Self {
            inner: Arc::new(Owner { shared, reactor }),
        }
    }

    fn source(&self) -> Source {
        Source::Connection(self.inner.shared.clone())
    }

    /// Reads bytes until `predicate` returns `false`.
    ///
    /// Each received byte is passed to `predicate`; the byte it returns
    /// `false` for ends the read and is included in the result. Bytes that
    /// arrive after it are kept for the next read. If the peer closes the
    /// connection first the promise settles with whatever was received.
    ///
    /// A panicking predicate fails the read with
    /// [`Error::Panicked`](crate::Error::Panicked).
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let line = connection.read_until(|b| b != b'\n').wait()?;
    /// assert_eq!(line.last(), Some(&b'\n'));
    /// ```
    pub fn read_until<P>(&self, predicate: P) -> Promise<Vec<u8>>
    where
        P: FnMut(u8) -> bool + Send + 'static,
    {
        let promise = Promise::new();
        let request = ReadRequest::new(predicate, promise.clone());

        self.inner
            .reactor
            .submit(&self.source(), &self.inner.shared.reads, request);

        promise
    }

    /// Reads exactly `n` bytes, or fewer if the peer closes first.
    pub fn read_exact(&self, n: usize) -> Promise<Vec<u8>> {
        if n == 0 {
            return Promise::ready(Vec::new());
        }

        let mut remaining = n;
        self.read_until(move |_| {
            remaining -= 1;
            remaining > 0
        })
    }

    /// Writes all of `data`.
    ///
    /// Settles with the number of bytes written, which is `data.len()`.
    pub fn write(&self, data: Vec<u8>) -> Promise<usize> {
        let promise = Promise::new();
        let request = WriteRequest::new(data, promise.clone());

        self.inner
            .reactor
            .submit(&self.source(), &self.inner.shared.writes, request);

        promise
    }

    /// Closes the connection.
    ///
    /// Queued and in-flight requests fail with
    /// [`Error::Closed`](crate::Error::Closed). The promise settles once the
    /// socket is closed; closing twice is harmless.
    pub fn close(&self) -> Promise<()> {
        self.inner.reactor.close(self.source())
    }

    /// Returns `true` once the connection was closed or the reactor stopped.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.state.check().is_err()
    }

    /// Returns the address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.shared.peer_addr
    }

    /// Returns the local address of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.shared.local_addr
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_addr", &self.local_addr())
            .field("peer_addr", &self.peer_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}
