use crate::error::{Error, Outcome};
use crate::promise::Promise;
use crate::runtime::context::{Transaction, enter_transaction};

use std::panic::{self, AssertUnwindSafe};

/// Evaluates callables on behalf of the scheduler.
///
/// The scheduler treats a unit of work as an opaque callable plus the
/// dispatcher that knows how to run it. `invoke` runs on a worker thread
/// (or inline on the submitter when the queue is saturated).
pub trait Dispatch: Send + Sync + 'static {
    /// The unit of work, e.g. a closure value of the hosted language.
    type Callable: Send + 'static;

    /// What invoking a callable produces.
    type Value: Clone + Send + Sync + 'static;

    /// Runs `callable` to completion.
    fn invoke(&self, callable: &Self::Callable) -> Outcome<Self::Value>;
}

/// A type-erased piece of work owning the promise it must settle.
pub(crate) trait Runnable: Send {
    /// Executes the work and settles its promise.
    fn run(self: Box<Self>);

    /// Settles the promise with `error` without running anything.
    fn abandon(self: Box<Self>, error: Error);
}

/// A closure together with the promise for its result.
pub(crate) struct FnJob<F, T> {
    f: F,
    promise: Promise<T>,
}

impl<F, T> FnJob<F, T> {
    pub(crate) fn new(f: F, promise: Promise<T>) -> Self {
        Self { f, promise }
    }
}

impl<F, T> Runnable for FnJob<F, T>
where
    F: FnOnce() -> Outcome<T> + Send + 'static,
    T: Send + Sync + 'static,
{
    fn run(self: Box<Self>) {
        let Self { f, promise } = *self;

        let outcome = panic::catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| Err(Error::from_panic(payload)));

        let _ = promise.try_settle(outcome);
    }

    fn abandon(self: Box<Self>, error: Error) {
        let _ = self.promise.try_settle(Err(error));
    }
}

/// One pre-allocated ring slot.
///
/// Filled by the producer that claimed it and emptied by the worker that
/// consumed it; never allocated or freed on its own.
#[derive(Default)]
pub(crate) struct Task {
    pending: Option<Pending>,
}

impl Task {
    pub(crate) fn new(pending: Pending) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    /// Moves the work out, leaving the slot empty for the next lap.
    pub(crate) fn take(&mut self) -> Option<Pending> {
        self.pending.take()
    }
}

/// Work taken out of a slot, ready to execute.
pub(crate) struct Pending {
    job: Box<dyn Runnable>,
    transaction: Option<Transaction>,
}

impl Pending {
    pub(crate) fn new(job: Box<dyn Runnable>, transaction: Option<Transaction>) -> Self {
        Self { job, transaction }
    }

    /// Runs the job with its transaction installed on the current thread.
    pub(crate) fn execute(self) {
        let Self { job, transaction } = self;
        enter_transaction(transaction, || job.run());
    }

    pub(crate) fn abandon(self, error: Error) {
        self.job.abandon(error);
    }
}
