//! Single-assignment values that become available later.
//!
//! A [`Promise`] starts pending and is settled exactly once with an
//! [`Outcome`]. Code interested in the value either registers a continuation
//! ([`Promise::on_settle`] and the combinators built on it) or blocks the
//! current thread with [`Promise::wait`] / [`Promise::timeout`].
//! [`Promise::deadline`] bounds a promise without blocking anyone.
//!
//! Continuations run inside `settle`, on the thread that settles the
//! promise, or right away on the registering thread if the promise is
//! already settled. Settling from inside a continuation runs the inner
//! continuations before the outer one resumes, up to a fixed nesting depth.
//! Past that depth they are deferred to a per-thread queue, drained when the
//! outermost continuation returns or when the thread is about to block in
//! [`Promise::wait`] / [`Promise::timeout`]. Chains of any length therefore
//! run in bounded stack space.

mod combinators;
mod deadline;
mod trampoline;
mod wait;

use crate::error::Outcome;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, OnceLock};

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

/// Shared state behind every non-NEVER promise.
struct Cell<T> {
    /// Written once, under the `pending` lock.
    value: OnceLock<Outcome<T>>,

    /// Continuations waiting for the value, in registration order.
    pending: Mutex<Vec<Continuation<T>>>,

    /// Signalled on settlement, for blocking waiters.
    settled: Condvar,
}

enum Repr<T> {
    /// Permanently pending, shared by every copy, allocation-free.
    Never,
    Cell(Arc<Cell<T>>),
}

/// A value of type `T` that will be available at some point, or a failure.
///
/// Cloning a promise is cheap and every clone observes the same settlement.
///
/// # Examples
///
/// ```rust,ignore
/// let promise = Promise::new();
/// let doubled = promise.map(|n: u32| n * 2);
///
/// promise.settle(Ok(21));
/// assert_eq!(doubled.wait().unwrap(), 42);
/// ```
pub struct Promise<T> {
    repr: Repr<T>,
}

impl<T> Promise<T> {
    /// Creates a pending promise.
    pub fn new() -> Self {
        Self {
            repr: Repr::Cell(Arc::new(Cell {
                value: OnceLock::new(),
                pending: Mutex::new(Vec::new()),
                settled: Condvar::new(),
            })),
        }
    }

    /// Returns the promise that never settles.
    ///
    /// Waiting on it blocks forever, continuations registered on it are
    /// dropped without running, and settling it panics.
    pub const fn never() -> Self {
        Self { repr: Repr::Never }
    }

    /// Creates a promise already settled with `value`.
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Creates a promise already settled with `error`.
    pub fn failed(error: crate::Error) -> Self {
        Self::settled(Err(error))
    }

    fn settled(outcome: Outcome<T>) -> Self {
        let promise = Self::new();
        if let Repr::Cell(cell) = &promise.repr {
            let _ = cell.value.set(outcome);
        }
        promise
    }

    /// Returns `true` for the NEVER promise.
    pub fn is_never(&self) -> bool {
        matches!(self.repr, Repr::Never)
    }

    /// Returns `true` once the promise holds an outcome.
    pub fn is_settled(&self) -> bool {
        match &self.repr {
            Repr::Never => false,
            Repr::Cell(cell) => cell.value.get().is_some(),
        }
    }

    /// Settles the promise and runs every registered continuation.
    ///
    /// # Panics
    ///
    /// Panics if the promise is already settled, or if it is the NEVER
    /// promise.
    pub fn settle(&self, outcome: Outcome<T>)
    where
        T: 'static,
    {
        if self.offer(outcome).is_err() {
            panic!("promise settled twice");
        }
    }

    /// Settles the promise unless it already holds an outcome.
    ///
    /// The existing outcome is never overwritten; the rejected one is
    /// handed back.
    ///
    /// # Panics
    ///
    /// Panics on the NEVER promise.
    pub fn try_settle(&self, outcome: Outcome<T>) -> Result<(), Outcome<T>>
    where
        T: 'static,
    {
        self.offer(outcome).inspect_err(|_| {
            tracing::warn!("promise already settled, discarding outcome");
        })
    }

    /// Same as [`try_settle`](Self::try_settle), without logging a rejection.
    pub(crate) fn offer(&self, outcome: Outcome<T>) -> Result<(), Outcome<T>>
    where
        T: 'static,
    {
        let Repr::Cell(cell) = &self.repr else {
            panic!("the NEVER promise cannot be settled");
        };

        let continuations = {
            let mut pending = cell.pending.lock().unwrap();

            cell.value.set(outcome)?;
            std::mem::take(&mut *pending)
        };

        cell.settled.notify_all();

        for continuation in continuations {
            let cell = cell.clone();
            trampoline::run(Box::new(move || {
                if let Some(outcome) = cell.value.get() {
                    continuation(outcome);
                }
            }));
        }

        Ok(())
    }

    /// Registers `f` to run with the outcome once the promise settles.
    ///
    /// On an already-settled promise `f` runs immediately on the calling
    /// thread. On the NEVER promise `f` is dropped.
    pub fn on_settle<F>(&self, f: F)
    where
        T: 'static,
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let Repr::Cell(cell) = &self.repr else {
            return;
        };

        let mut pending = cell.pending.lock().unwrap();

        if cell.value.get().is_none() {
            pending.push(Box::new(f));
            return;
        }
        drop(pending);

        let cell = cell.clone();
        trampoline::run(Box::new(move || {
            if let Some(outcome) = cell.value.get() {
                f(outcome);
            }
        }));
    }
}

impl<T: Clone> Promise<T> {
    /// Returns a copy of the outcome if the promise is settled.
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &self.repr {
            Repr::Never => None,
            Repr::Cell(cell) => cell.value.get().cloned(),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Never => Repr::Never,
            Repr::Cell(cell) => Repr::Cell(cell.clone()),
        };

        Self { repr }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Never => f.write_str("Promise(NEVER)"),
            Repr::Cell(cell) => match cell.value.get() {
                Some(outcome) => f.debug_tuple("Promise").field(outcome).finish(),
                None => f.write_str("Promise(<pending>)"),
            },
        }
    }
}
