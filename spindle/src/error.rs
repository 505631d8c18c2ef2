use std::any::Any;
use std::io;
use std::sync::Arc;

/// The value every [`Promise`](crate::Promise) settles with.
pub type Outcome<T> = Result<T, Error>;

/// Failure values carried by promises.
///
/// Errors never unwind across a thread boundary. A task that panics on a
/// worker, or a socket operation that fails on the reactor thread, is turned
/// into one of these variants and stored in the corresponding promise.
///
/// `Error` is cheap to clone because a settled outcome is handed to every
/// continuation registered on the promise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The callable panicked while executing.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The callable returned an error of its own.
    #[error("task failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// An operating system I/O error.
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// The connection or listener was closed before the request completed.
    #[error("connection closed")]
    Closed,

    /// The runtime shut down before the request completed.
    #[error("runtime is shutting down")]
    Shutdown,

    /// A request queue stayed full for the whole submission budget.
    #[error("request queue is full")]
    QueueFull,

    /// A deadline passed before the promise settled.
    #[error("deadline elapsed")]
    Timeout,
}

impl Error {
    /// Wraps an arbitrary error raised by a callable.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(error))
    }

    /// Converts a panic payload caught with `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Error::Panicked(message)
    }

    /// Returns the underlying I/O error kind, if this is an I/O failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}
