use std::os::fd::RawFd;

/// Readiness a registered socket is armed for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Interrupts a blocking poll from another thread.
///
/// Owns the underlying descriptor and closes it on drop, so it stays valid
/// for as long as any handle can still call [`wake`](Waker::wake).
pub(crate) struct Waker(pub(crate) RawFd);
