use super::command::Command;
use super::event::Event;
use super::io::{ConnectionEntry, ConnectionShared, Entry, ListenerEntry, ListenerShared, Source};
use super::poller::platform::Socket;
use super::poller::{Interest, Poller, Waker};
use super::queue::{Request, RequestQueue};
use super::timer::{TimerAction, TimerEntry, Timers};
use crate::error::Error;
use crate::net::tcp::{Connection, Listener};
use crate::promise::Promise;
use crate::utils::Slab;

use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{self, AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

/// Sizing of the per-socket request queues.
#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// Capacity of each connection's read queue and write queue.
    /// Must be a power of two.
    pub request_queue_capacity: usize,

    /// Capacity of each listener's accept queue. Must be a power of two.
    pub accept_queue_capacity: usize,

    /// Publish attempts before a request fails with [`Error::QueueFull`].
    pub submit_spins: u32,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            request_queue_capacity: 16,
            accept_queue_capacity: 1024,
            submit_spins: 1000,
        }
    }
}

/// Cloneable handle used to hand work to the reactor thread.
///
/// Obtained from [`Runtime::reactor`](crate::Runtime::reactor). Every
/// operation returns immediately with a [`Promise`]; the reactor settles it
/// once the socket is ready.
#[derive(Clone)]
pub struct ReactorHandle {
    sender: Sender<Command>,
    waker: Arc<Waker>,

    /// Set by the reactor thread before it fails everything outstanding.
    stopped: Arc<AtomicBool>,

    config: ReactorConfig,
}

impl ReactorHandle {
    /// Sends a command and wakes the reactor.
    ///
    /// Gives the command back if the reactor thread is gone.
    pub(crate) fn send(&self, command: Command) -> Result<(), Command> {
        self.sender.send(command).map_err(|e| e.0)?;
        self.waker.wake();
        Ok(())
    }

    /// Sends `command`, returning `false` if the reactor may never see it.
    ///
    /// On `false` the caller settles whatever it kept a copy of; the
    /// reactor settles quietly, so both sides may try.
    fn deliver(&self, command: Command) -> bool {
        if let Err(command) = self.send(command) {
            command.abandon(Error::Shutdown);
            return false;
        }

        atomic::fence(Ordering::SeqCst);
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the queue sizing sockets are created with.
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Returns `true` once the reactor thread has stopped serving requests.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Binds a listening socket on `address`.
    ///
    /// Port `0` picks a free port; see [`Listener::local_addr`].
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let reactor = runtime.reactor().unwrap();
    /// let listener = reactor.listen("127.0.0.1:0".parse()?).wait()?;
    /// println!("listening on {}", listener.local_addr());
    /// ```
    pub fn listen(&self, address: SocketAddr) -> Promise<Listener> {
        let promise = Promise::new();

        let command = Command::Listen {
            address,
            promise: promise.clone(),
        };
        if !self.deliver(command) {
            promise.clone().fail(Error::Shutdown);
        }

        promise
    }

    /// Opens a TCP connection to `address`.
    ///
    /// The connect itself runs on the reactor thread; a refused or
    /// unreachable peer fails the promise with [`Error::Io`].
    pub fn connect(&self, address: SocketAddr) -> Promise<Connection> {
        let promise = Promise::new();

        let command = Command::Connect {
            address,
            promise: promise.clone(),
        };
        if !self.deliver(command) {
            promise.clone().fail(Error::Shutdown);
        }

        promise
    }

    /// Queues `request` on `source` and arms the socket for it.
    pub(crate) fn submit<R: Request>(&self, source: &Source, queue: &RequestQueue<R>, request: R) {
        if let Err(error) = source.state().check() {
            request.fail(error);
            return;
        }

        if !queue.push(request) {
            return;
        }

        let command = Command::Arm {
            source: source.clone(),
        };
        if !self.deliver(command) {
            let error = source.state().check().err().unwrap_or(Error::Shutdown);
            queue.drain(&error);
        }
    }

    /// Arms a timer on the reactor thread.
    ///
    /// `action` runs there with `Ok(())` once `deadline` has passed, or with
    /// [`Error::Shutdown`] if the reactor stops first. It is dropped without
    /// running if `cancelled` is set before the deadline.
    ///
    /// Returns `false` if the reactor may never see the timer. The action
    /// may or may not have run in that case, so the caller settles whatever
    /// it kept a copy of.
    ///
    /// # Arguments
    ///
    /// * `deadline` - Earliest instant at which `action` may run.
    /// * `cancelled` - Optional flag that disarms the timer once set.
    /// * `action` - Callback run exactly once unless cancelled.
    pub(crate) fn set_timer(
        &self,
        deadline: Instant,
        cancelled: Option<Arc<AtomicBool>>,
        action: TimerAction,
    ) -> bool {
        self.deliver(Command::SetTimer {
            deadline,
            action,
            cancelled,
        })
    }

    /// Returns a promise that settles with `()` once `duration` has passed.
    ///
    /// The promise fails with [`Error::Shutdown`] if the reactor stops
    /// first. No thread is blocked while waiting.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let reactor = runtime.reactor().unwrap();
    /// let later = reactor.sleep(Duration::from_millis(50)).map(|()| "done");
    /// assert_eq!(later.wait()?, "done");
    /// ```
    pub fn sleep(&self, duration: Duration) -> Promise<()> {
        let promise = Promise::new();

        let target = promise.clone();
        let action: TimerAction = Box::new(move |outcome| {
            let _ = target.offer(outcome);
        });

        if !self.set_timer(Instant::now() + duration, None, action) {
            let _ = promise.offer(Err(Error::Shutdown));
        }

        promise
    }

    /// Closes `source` on the reactor thread.
    ///
    /// Settles once the socket is closed; closing twice is harmless.
    pub(crate) fn close(&self, source: Source) -> Promise<()> {
        if !source.state().close() {
            return Promise::ready(());
        }

        let promise = Promise::new();

        let command = Command::Close {
            source: source.clone(),
            promise: promise.clone(),
        };
        if !self.deliver(command) {
            source.drain(&Error::Closed);
            let _ = promise.offer(Ok(()));
        }

        promise
    }
}

/// The reactor thread and a handle to it.
///
/// Dropping the reactor stops the thread.
pub(crate) struct Reactor {
    handle: ReactorHandle,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Creates the poller and starts the reactor thread.
    ///
    /// # Arguments
    ///
    /// * `config` - Queue sizing for every listener and connection the
    ///   reactor will create.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the epoll instance, the wake-up eventfd or
    /// the thread cannot be created.
    pub(crate) fn start(config: ReactorConfig) -> Result<Self, Error> {
        let poller = Poller::new()?;
        let (sender, receiver) = mpsc::channel();

        let handle = ReactorHandle {
            sender,
            waker: poller.waker(),
            stopped: Arc::new(AtomicBool::new(false)),
            config,
        };

        let core = ReactorCore {
            receiver,
            handle: handle.clone(),
            poller,
            events: Vec::with_capacity(64),
            entries: Slab::with_capacity(64),
            timers: Timers::default(),
        };

        let thread = thread::Builder::new()
            .name("spindle-reactor".to_string())
            .spawn(move || core.run())?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Stops the reactor thread and waits for it.
    ///
    /// Outstanding requests fail with [`Error::Shutdown`] and every socket
    /// is closed. Calling it again is a no-op.
    pub(crate) fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let _ = self.handle.send(Command::Shutdown);

        if thread.join().is_err() {
            error!("reactor thread panicked");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the reactor thread.
struct ReactorCore {
    receiver: Receiver<Command>,

    /// Given to every listener and connection the reactor creates.
    handle: ReactorHandle,

    poller: Poller,
    events: Vec<Event>,
    entries: Slab<Entry>,
    timers: Timers,
}

impl ReactorCore {
    fn run(mut self) {
        debug!("reactor started");

        'running: loop {
            while let Ok(command) = self.receiver.try_recv() {
                if !self.handle_command(command) {
                    break 'running;
                }
            }

            let mut events = mem::take(&mut self.events);
            let timeout = self.timers.next_timeout(Instant::now());

            if let Err(error) = self.poller.poll(&mut events, timeout) {
                error!(%error, "poller failed, stopping reactor");
                break;
            }

            for event in events.drain(..) {
                self.handle_event(event);
            }

            self.events = events;

            let fired = self.timers.fire_expired(Instant::now());
            if fired > 0 {
                trace!(fired, pending = self.timers.len(), "timers fired");
            }
        }

        self.stop();
    }

    /// Returns `false` when the loop should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Listen { address, promise } => {
                let outcome = self.listen(address);
                let _ = promise.offer(outcome);
            }

            Command::Connect { address, promise } => {
                if let Err(error) = self.connect(address, promise.clone()) {
                    debug!(%address, %error, "connect failed");
                    promise.fail(error);
                }
            }

            Command::Arm { source } => {
                let token = source.token();

                match self.entries.get(token) {
                    Some(entry) if entry.is(&source) => self.service(token),
                    _ => {
                        let error = source.state().check().err().unwrap_or(Error::Closed);
                        source.drain(&error);
                    }
                }
            }

            Command::Close { source, promise } => {
                let token = source.token();

                match self.entries.get(token) {
                    Some(entry) if entry.is(&source) => self.close(token, Error::Closed),
                    _ => {
                        source.drain(&Error::Closed);
                    }
                }

                let _ = promise.offer(Ok(()));
            }

            Command::SetTimer {
                deadline,
                action,
                cancelled,
            } => {
                self.timers.push(TimerEntry {
                    deadline,
                    action,
                    cancelled,
                });
            }

            Command::Shutdown => return false,
        }

        true
    }

    fn handle_event(&mut self, event: Event) {
        trace!(
            token = event.token,
            readable = event.readable,
            writable = event.writable,
            "socket ready"
        );

        match self.entries.get(event.token) {
            Some(Entry::Connecting { .. }) => self.finish_connect(event.token),
            Some(_) => self.service(event.token),
            None => {}
        }
    }

    fn listen(&mut self, address: SocketAddr) -> Result<Listener, Error> {
        let socket = Socket::listen(&address)?;
        let local_addr = socket.local_addr()?;

        let token = self.entries.vacant_key();
        let shared = Arc::new(ListenerShared::new(token, local_addr, &self.handle.config));

        self.poller.register(socket.fd(), token, Interest::NONE)?;
        self.entries.insert(Entry::Listener(ListenerEntry {
            socket,
            shared: shared.clone(),
            accepting: None,
        }));

        debug!(token, %local_addr, "listener registered");
        Ok(Listener::new(shared, self.handle.clone()))
    }

    fn connect(&mut self, address: SocketAddr, promise: Promise<Connection>) -> Result<(), Error> {
        let socket = Socket::stream_for(&address)?;
        socket.connect(&address)?;

        let token = self.entries.vacant_key();
        self.poller.register(socket.fd(), token, Interest::WRITE)?;
        self.entries.insert(Entry::Connecting { socket, promise });

        trace!(token, %address, "connect in progress");
        Ok(())
    }

    /// Completes a pending connect once its socket became writable.
    fn finish_connect(&mut self, token: usize) {
        let Some(Entry::Connecting { socket, promise }) = self.entries.remove(token) else {
            return;
        };

        let _ = self.poller.deregister(socket.fd());

        let outcome = connected_peer(&socket).and_then(|peer| self.adopt(socket, peer));
        if let Err(error) = &outcome {
            debug!(token, %error, "connect failed");
        }

        let _ = promise.offer(outcome);
    }

    /// Registers an established socket as a connection.
    fn adopt(&mut self, socket: Socket, peer_addr: SocketAddr) -> Result<Connection, Error> {
        let local_addr = socket.local_addr()?;

        let token = self.entries.vacant_key();
        let shared = Arc::new(ConnectionShared::new(
            token,
            local_addr,
            peer_addr,
            &self.handle.config,
        ));

        self.poller.register(socket.fd(), token, Interest::NONE)?;
        self.entries
            .insert(Entry::Connection(ConnectionEntry::new(socket, shared.clone())));

        debug!(token, %peer_addr, "connection registered");
        Ok(Connection::new(shared, self.handle.clone()))
    }

    /// Serves whatever the entry at `token` can make progress on, then
    /// re-arms it.
    fn service(&mut self, token: usize) {
        let accepted = match self.entries.get_mut(token) {
            Some(Entry::Listener(entry)) => accept_one(entry),
            Some(Entry::Connection(entry)) => {
                entry.pump_reads();
                entry.pump_writes();
                None
            }
            Some(Entry::Connecting { .. }) | None => return,
        };

        if let Some((promise, outcome)) = accepted {
            let outcome = outcome.and_then(|(socket, peer)| self.adopt(socket, peer));
            let _ = promise.offer(outcome);
        }

        self.rearm(token);
    }

    fn rearm(&mut self, token: usize) {
        let (fd, interest) = match self.entries.get(token) {
            Some(Entry::Listener(entry)) => (entry.socket.fd(), entry.interest()),
            Some(Entry::Connection(entry)) => (entry.socket.fd(), entry.interest()),
            Some(Entry::Connecting { .. }) | None => return,
        };

        // Nothing queued: stay disarmed until the next `Arm`.
        if interest.is_empty() {
            return;
        }

        if let Err(error) = self.poller.rearm(fd, token, interest) {
            error!(token, %error, "failed to re-arm socket, closing it");
            self.close(token, error.into());
        }
    }

    /// Removes the entry at `token`, failing what it still holds.
    fn close(&mut self, token: usize, error: Error) {
        let Some(entry) = self.entries.remove(token) else {
            return;
        };

        let _ = self.poller.deregister(entry.socket().fd());
        let failed = entry.fail_all(error);

        debug!(token, failed, "socket closed");
    }

    /// Fails everything outstanding and closes every socket.
    fn stop(&mut self) {
        self.handle.stopped.store(true, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);

        let entries = self.entries.len();
        let mut failed = 0;

        for (_, entry) in self.entries.drain() {
            failed += entry.fail_all(Error::Shutdown);
        }

        let timers = self.timers.abandon_all(&Error::Shutdown);

        while let Ok(command) = self.receiver.try_recv() {
            command.abandon(Error::Shutdown);
        }

        debug!(entries, failed, timers, "reactor stopped");
    }
}

type Accepted = (Promise<Connection>, Result<(Socket, SocketAddr), Error>);

/// Accepts at most one connection, and only if someone is waiting for it.
fn accept_one(entry: &mut ListenerEntry) -> Option<Accepted> {
    let promise = entry
        .accepting
        .take()
        .or_else(|| entry.shared.accepts.pop())?;

    match entry.socket.accept() {
        Ok(accepted) => Some((promise, Ok(accepted))),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ) =>
        {
            entry.accepting = Some(promise);
            None
        }
        Err(e) => Some((promise, Err(e.into()))),
    }
}

/// Returns the peer of a socket whose non-blocking connect finished.
fn connected_peer(socket: &Socket) -> Result<SocketAddr, Error> {
    if let Some(error) = socket.take_error()? {
        return Err(error.into());
    }

    Ok(socket.peer_addr()?)
}
