//! Linux `epoll`-based poller implementation.
//!
//! Responsibilities:
//! - Register sockets with one-shot read/write interests
//! - Re-arm them once the reactor knows what it still needs
//! - Block waiting for I/O readiness
//! - Wake the reactor when new commands are submitted

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl,
    epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// This value must never collide with tokens produced by the slab.
/// Using `u64::MAX` guarantees uniqueness.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - the waker wrapping an internal `eventfd`,
/// - a reusable event buffer.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait`
    /// to return immediately. A full counter already guarantees a wake-up,
    /// so errors are ignored.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const u64 as *const _, 8);
        }
    }

    fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.0, &mut buf as *mut u64 as *mut _, 8);
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

fn last_error_if(rc: i32) -> io::Result<i32> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn oneshot_flags(interest: Interest) -> u32 {
    let mut flags = EPOLLONESHOT | EPOLLRDHUP;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    ///
    /// This:
    /// - creates the epoll instance,
    /// - creates a non-blocking `eventfd`,
    /// - registers the eventfd into epoll as a persistent wake source.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = last_error_if(unsafe { epoll_create1(EPOLL_CLOEXEC) })?;

        let eventfd = match last_error_if(unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) }) {
            Ok(fd) => fd,
            Err(e) => {
                unsafe { libc::close(epoll) };
                return Err(e);
            }
        };

        let poller = Self {
            epoll,
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(eventfd)),
        };

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        last_error_if(unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) })?;

        Ok(poller)
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a descriptor, armed once for `interest`.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: oneshot_flags(interest),
            u64: token as u64,
        };

        last_error_if(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) }).map(drop)
    }

    /// Arm an already registered descriptor for one more event.
    pub(crate) fn rearm(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: oneshot_flags(interest),
            u64: token as u64,
        };

        last_error_if(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) }).map(drop)
    }

    /// Remove a descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        last_error_if(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) })
            .map(drop)
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until at least one registered descriptor becomes ready, the
    /// waker is triggered, or the optional `timeout` expires. Interrupted
    /// waits return with no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();
        self.events.clear();

        // Rounded up: a timer due in 300µs must not turn into a busy 0ms poll.
        let timeout_ms = timeout
            .map(|t| t.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let flags = ev.events;
            let failed = flags & ((EPOLLERR | EPOLLHUP) as u32) != 0;

            events.push(Event {
                token: ev.u64 as usize,
                readable: failed || flags & ((EPOLLIN | EPOLLRDHUP) as u32) != 0,
                writable: failed || flags & (EPOLLOUT as u32) != 0,
            });
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll) };
    }
}
