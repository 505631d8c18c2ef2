/// Readiness reported by the poller for one registered socket.
///
/// Sockets are armed one-shot, so each `Event` is followed by exactly one
/// service pass in the reactor, which then decides whether to re-arm.
/// Errors and hang-ups are reported as both readable and writable so the
/// pending request observes the failure from its own syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Event {
    /// Slab token of the registered socket.
    pub(crate) token: usize,

    /// The socket can be read from (or accepted on).
    pub(crate) readable: bool,

    /// The socket can be written to, or a pending connect finished.
    pub(crate) writable: bool,
}
