use super::io::Source;
use super::queue::Request;
use super::timer::TimerAction;
use crate::error::Error;
use crate::net::tcp::{Connection, Listener};
use crate::promise::Promise;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

/// Messages sent from application threads to the reactor thread.
///
/// Every command that is sent is followed by a wake-up of the poller, so
/// the reactor handles it even when no socket is ready.
pub(crate) enum Command {
    /// Bind and listen on `address`.
    Listen {
        address: SocketAddr,
        promise: Promise<Listener>,
    },

    /// Open a connection to `address`.
    Connect {
        address: SocketAddr,
        promise: Promise<Connection>,
    },

    /// New requests were queued on `source`.
    Arm { source: Source },

    /// Close `source` and fail what it still has queued.
    Close {
        source: Source,
        promise: Promise<()>,
    },

    /// Run `action` once `deadline` has passed, unless `cancelled` is set
    /// by then.
    SetTimer {
        deadline: Instant,
        action: TimerAction,
        cancelled: Option<Arc<AtomicBool>>,
    },

    /// Stop the reactor loop.
    Shutdown,
}

impl Command {
    /// Fails whatever the command was carrying, without executing it.
    pub(crate) fn abandon(self, error: Error) {
        match self {
            Command::Listen { promise, .. } => promise.fail(error),
            Command::Connect { promise, .. } => promise.fail(error),
            Command::Arm { source } => {
                let error = source.state().check().err().unwrap_or(error);
                source.drain(&error);
            }
            Command::Close { source, promise } => {
                source.drain(&Error::Closed);
                let _ = promise.offer(Ok(()));
            }
            Command::SetTimer { action, .. } => action(Err(error)),
            Command::Shutdown => {}
        }
    }
}
