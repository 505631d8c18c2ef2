use super::connection::Connection;
use crate::promise::Promise;
use crate::reactor::{ListenerShared, ReactorHandle, Source};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// A TCP listener served by the reactor.
///
/// Created with [`ReactorHandle::listen`]. Clones share the same socket.
///
/// # Examples
///
/// ```rust,ignore
/// let listener = reactor.listen("127.0.0.1:0".parse()?).wait()?;
/// let connection = listener.accept().wait()?;
/// println!("client {}", connection.peer_addr());
/// ```
#[derive(Clone)]
pub struct Listener {
    inner: Arc<Owner>,
}

/// Closes the listening socket when the last handle goes away.
struct Owner {
    shared: Arc<ListenerShared>,
    reactor: ReactorHandle,
}

impl Drop for Owner {
    fn drop(&mut self) {
        let _ = self
            .reactor
            .close(Source::Listener(self.shared.clone()));
    }
}

impl Listener {
    pub(crate) fn new(shared: Arc<ListenerShared>, reactor: ReactorHandle) -> Self {
        Self {
            inner: Arc::new(Owner { shared, reactor }),
        }
    }

    fn source(&self) -> Source {
        Source::Listener(self.inner.shared.clone())
    }

    /// Accepts the next incoming connection.
    ///
    /// The listener only accepts while at least one `accept` promise is
    /// queued; clients beyond that wait in the kernel backlog.
    ///
    /// The promise fails with [`Error::Closed`](crate::Error::Closed) if the
    /// listener is closed first, and with
    /// [`Error::QueueFull`](crate::Error::QueueFull) if too many accepts are
    /// already queued.
    pub fn accept(&self) -> Promise<Connection> {
        let promise = Promise::new();
        let shared = &self.inner.shared;

        self.inner
            .reactor
            .submit(&self.source(), &shared.accepts, promise.clone());

        promise
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.shared.local_addr
    }

    /// Returns `true` once the listener was closed or the reactor stopped.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.state.check().is_err()
    }

    /// Stops listening.
    ///
    /// Queued accepts fail with [`Error::Closed`](crate::Error::Closed). The
    /// promise settles once the socket is closed.
    pub fn close(&self) -> Promise<()> {
        self.inner.reactor.close(self.source())
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}
