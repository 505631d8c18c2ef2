use super::core::ReactorConfig;
use super::poller::common::Interest;
use super::poller::platform::Socket;
use super::queue::{Request, RequestQueue};
use crate::error::{Error, Outcome};
use crate::net::tcp::Connection;
use crate::promise::Promise;

use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Size of a single `recv` into the connection input buffer.
const READ_CHUNK: usize = 4096;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;
const SHUTDOWN: u8 = 2;

/// Lifecycle of a listener or connection, readable from any thread.
pub(crate) struct SourceState(AtomicU8);

impl SourceState {
    fn new() -> Self {
        Self(AtomicU8::new(OPEN))
    }

    /// Returns the error new requests fail with, or `Ok` while open.
    pub(crate) fn check(&self) -> Result<(), Error> {
        match self.0.load(Ordering::Acquire) {
            OPEN => Ok(()),
            CLOSED => Err(Error::Closed),
            _ => Err(Error::Shutdown),
        }
    }

    /// Moves from open to closed. Returns `false` if already not open.
    pub(crate) fn close(&self) -> bool {
        self.0
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the source as torn down by reactor shutdown, unless it was
    /// closed first.
    pub(crate) fn shut_down(&self) {
        let _ = self
            .0
            .compare_exchange(OPEN, SHUTDOWN, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// The part of a listener shared between its handles and the reactor.
pub(crate) struct ListenerShared {
    pub(crate) token: usize,
    pub(crate) state: SourceState,
    pub(crate) local_addr: SocketAddr,

    /// Promises waiting for the next incoming connection.
    pub(crate) accepts: RequestQueue<Promise<Connection>>,
}

impl ListenerShared {
    pub(crate) fn new(token: usize, local_addr: SocketAddr, config: &ReactorConfig) -> Self {
        Self {
            token,
            state: SourceState::new(),
            local_addr,
            accepts: RequestQueue::new(config.accept_queue_capacity, config.submit_spins),
        }
    }
}

/// The part of a connection shared between its handles and the reactor.
pub(crate) struct ConnectionShared {
    pub(crate) token: usize,
    pub(crate) state: SourceState,
    pub(crate) local_addr: SocketAddr,
    pub(crate) peer_addr: SocketAddr,

    pub(crate) reads: RequestQueue<ReadRequest>,
    pub(crate) writes: RequestQueue<WriteRequest>,
}

impl ConnectionShared {
    pub(crate) fn new(
        token: usize,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        config: &ReactorConfig,
    ) -> Self {
        Self {
            token,
            state: SourceState::new(),
            local_addr,
            peer_addr,
            reads: RequestQueue::new(config.request_queue_capacity, config.submit_spins),
            writes: RequestQueue::new(config.request_queue_capacity, config.submit_spins),
        }
    }
}

/// A registered listener or connection, as seen by request submitters.
#[derive(Clone)]
pub(crate) enum Source {
    Listener(Arc<ListenerShared>),
    Connection(Arc<ConnectionShared>),
}

impl Source {
    pub(crate) fn token(&self) -> usize {
        match self {
            Source::Listener(shared) => shared.token,
            Source::Connection(shared) => shared.token,
        }
    }

    pub(crate) fn state(&self) -> &SourceState {
        match self {
            Source::Listener(shared) => &shared.state,
            Source::Connection(shared) => &shared.state,
        }
    }

    /// Fails every queued request with `error`.
    pub(crate) fn drain(&self, error: &Error) -> usize {
        match self {
            Source::Listener(shared) => shared.accepts.drain(error),
            Source::Connection(shared) => {
                shared.reads.drain(error) + shared.writes.drain(error)
            }
        }
    }
}

/// A pending `read_until`.
pub(crate) struct ReadRequest {
    /// Returns `false` on the byte that ends the read.
    predicate: Box<dyn FnMut(u8) -> bool + Send>,
    collected: Vec<u8>,
    promise: Promise<Vec<u8>>,
}

/// Result of feeding buffered input to a read.
enum Feed {
    /// The predicate stopped on a byte; the read is complete.
    Stopped,

    /// Every buffered byte was accepted; more input is needed.
    Hungry,

    /// The predicate panicked.
    Panicked(Error),
}

impl ReadRequest {
    pub(crate) fn new<P>(predicate: P, promise: Promise<Vec<u8>>) -> Self
    where
        P: FnMut(u8) -> bool + Send + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            collected: Vec::new(),
            promise,
        }
    }

    /// Moves bytes from `input` into the read until the predicate stops.
    ///
    /// The stop byte is included; bytes after it stay in `input`. When the
    /// predicate panics `input` is left untouched.
    fn feed(&mut self, input: &mut Vec<u8>) -> Feed {
        let predicate = &mut self.predicate;
        let scanned =
            panic::catch_unwind(AssertUnwindSafe(|| input.iter().position(|&b| !predicate(b))));

        match scanned {
            Ok(Some(stop)) => {
                self.collected.extend(input.drain(..=stop));
                Feed::Stopped
            }
            Ok(None) => {
                self.collected.append(input);
                Feed::Hungry
            }
            Err(payload) => Feed::Panicked(Error::from_panic(payload)),
        }
    }

    fn complete(self, outcome: Outcome<Vec<u8>>) {
        let _ = self.promise.offer(outcome);
    }

    fn finish(mut self) {
        let collected = std::mem::take(&mut self.collected);
        self.complete(Ok(collected));
    }
}

impl Request for ReadRequest {
    fn fail(self, error: Error) {
        self.complete(Err(error));
    }
}

/// A pending `write`.
pub(crate) struct WriteRequest {
    data: Vec<u8>,
    written: usize,
    promise: Promise<usize>,
}

impl WriteRequest {
    pub(crate) fn new(data: Vec<u8>, promise: Promise<usize>) -> Self {
        Self {
            data,
            written: 0,
            promise,
        }
    }
}

impl Request for WriteRequest {
    fn fail(self, error: Error) {
        let _ = self.promise.offer(Err(error));
    }
}

/// Reactor-private state of an established connection.
pub(crate) struct ConnectionEntry {
    pub(crate) socket: Socket,
    pub(crate) shared: Arc<ConnectionShared>,

    /// Bytes received but not yet handed to a read.
    input: Vec<u8>,

    /// The peer shut down its side.
    eof: bool,

    /// Read being resumed on the next readiness event.
    reading: Option<ReadRequest>,

    /// Write being resumed on the next readiness event.
    writing: Option<WriteRequest>,
}

impl ConnectionEntry {
    pub(crate) fn new(socket: Socket, shared: Arc<ConnectionShared>) -> Self {
        Self {
            socket,
            shared,
            input: Vec::new(),
            eof: false,
            reading: None,
            writing: None,
        }
    }

    /// Serves queued reads until one has to wait for the socket.
    pub(crate) fn pump_reads(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];

        'requests: loop {
            let Some(mut read) = self.reading.take().or_else(|| self.shared.reads.pop()) else {
                return;
            };

            loop {
                match read.feed(&mut self.input) {
                    Feed::Stopped => {
                        read.finish();
                        continue 'requests;
                    }
                    Feed::Panicked(error) => {
                        read.fail(error);
                        continue 'requests;
                    }
                    Feed::Hungry => {}
                }

                if self.eof {
                    read.finish();
                    continue 'requests;
                }

                match self.socket.recv(&mut chunk) {
                    Ok(0) => self.eof = true,
                    Ok(n) => self.input.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.reading = Some(read);
                        return;
                    }
                    Err(e) => {
                        read.fail(e.into());
                        continue 'requests;
                    }
                }
            }
        }
    }

    /// Serves queued writes until one has to wait for the socket.
    pub(crate) fn pump_writes(&mut self) {
        'requests: loop {
            let Some(mut write) = self.writing.take().or_else(|| self.shared.writes.pop()) else {
                return;
            };

            while write.written < write.data.len() {
                match self.socket.send(&write.data[write.written..]) {
                    Ok(0) => {
                        write.fail(io::Error::from(io::ErrorKind::WriteZero).into());
                        continue 'requests;
                    }
                    Ok(n) => write.written += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.writing = Some(write);
                        return;
                    }
                    Err(e) => {
                        write.fail(e.into());
                        continue 'requests;
                    }
                }
            }

            let _ = write.promise.offer(Ok(write.written));
        }
    }

    /// Readiness the connection still needs.
    pub(crate) fn interest(&self) -> Interest {
        Interest {
            read: self.reading.is_some() || self.shared.reads.has_pending(),
            write: self.writing.is_some() || self.shared.writes.has_pending(),
        }
    }

    /// Fails the in-flight and queued requests with `error`.
    pub(crate) fn fail_all(&mut self, error: &Error) -> usize {
        let mut failed = 0;

        if let Some(read) = self.reading.take() {
            read.fail(error.clone());
            failed += 1;
        }
        if let Some(write) = self.writing.take() {
            write.fail(error.clone());
            failed += 1;
        }

        failed + self.shared.reads.drain(error) + self.shared.writes.drain(error)
    }
}

/// Reactor-private state of a listening socket.
pub(crate) struct ListenerEntry {
    pub(crate) socket: Socket,
    pub(crate) shared: Arc<ListenerShared>,

    /// Accept promise waiting for the next incoming connection.
    pub(crate) accepting: Option<Promise<Connection>>,
}

impl ListenerEntry {
    pub(crate) fn interest(&self) -> Interest {
        if self.accepting.is_some() || self.shared.accepts.has_pending() {
            Interest::READ
        } else {
            Interest::NONE
        }
    }

    pub(crate) fn fail_all(&mut self, error: &Error) -> usize {
        let in_flight = match self.accepting.take() {
            Some(promise) => {
                promise.fail(error.clone());
                1
            }
            None => 0,
        };

        in_flight + self.shared.accepts.drain(error)
    }
}

/// Everything the reactor keeps per token.
pub(crate) enum Entry {
    Listener(ListenerEntry),

    /// A non-blocking connect waiting for writability.
    Connecting {
        socket: Socket,
        promise: Promise<Connection>,
    },

    Connection(ConnectionEntry),
}

impl Entry {
    /// Returns `true` if this entry is the one `source` was registered as.
    pub(crate) fn is(&self, source: &Source) -> bool {
        match (self, source) {
            (Entry::Listener(entry), Source::Listener(shared)) => Arc::ptr_eq(&entry.shared, shared),
            (Entry::Connection(entry), Source::Connection(shared)) => {
                Arc::ptr_eq(&entry.shared, shared)
            }
            _ => false,
        }
    }

    pub(crate) fn socket(&self) -> &Socket {
        match self {
            Entry::Listener(entry) => &entry.socket,
            Entry::Connecting { socket, .. } => socket,
            Entry::Connection(entry) => &entry.socket,
        }
    }

    /// Fails everything outstanding and marks the source as no longer open.
    ///
    /// [`Error::Shutdown`] marks it shut down; any other error marks it
    /// closed.
    pub(crate) fn fail_all(self, error: Error) -> usize {
        let shutdown = matches!(error, Error::Shutdown);

        match self {
            Entry::Listener(mut entry) => {
                mark(&entry.shared.state, shutdown);
                entry.fail_all(&error)
            }
            Entry::Connecting { promise, .. } => {
                promise.fail(error);
                1
            }
            Entry::Connection(mut entry) => {
                mark(&entry.shared.state, shutdown);
                entry.fail_all(&error)
            }
        }
    }
}

fn mark(state: &SourceState, shutdown: bool) {
    if shutdown {
        state.shut_down();
    } else {
        state.close();
    }
}
