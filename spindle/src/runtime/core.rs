use super::builder::RuntimeBuilder;
use super::job::Dispatch;
use super::context::current_transaction;
use super::scheduler::{Scheduler, SchedulerConfig};
use super::timed::{self, Cadence, Periodic, Ticker};
use crate::error::{Error, Outcome};
use crate::promise::Promise;
use crate::reactor::{Reactor, ReactorConfig, ReactorHandle};

use std::sync::Arc;
use std::time::Duration;

/// The main runtime handle.
///
/// `Runtime` is responsible for:
/// - running callables asynchronously on the worker pool,
/// - owning the I/O reactor thread, when enabled,
/// - shutting both down in order.
///
/// Nothing is global: code that needs to submit work or open sockets is
/// handed a `&Runtime`, a `&Scheduler` or a [`ReactorHandle`].
///
/// Dropping the runtime shuts down all internal components in an orderly
/// fashion.
pub struct Runtime {
    /// Worker pool draining the task ring.
    scheduler: Scheduler,

    /// Reactor thread, if enabled.
    reactor: Option<Reactor>,
}

impl Runtime {
    /// Creates a new runtime instance.
    ///
    /// The scheduler's workers are started first, then the reactor.
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Configuration of the worker pool.
    /// * `reactor` - Configuration of the reactor, or `None` to run
    ///   without one.
    pub(crate) fn new(
        scheduler: SchedulerConfig,
        reactor: Option<ReactorConfig>,
    ) -> Result<Self, Error> {
        let scheduler = Scheduler::new(scheduler)?;
        let reactor = reactor.map(Reactor::start).transpose()?;

        Ok(Self { scheduler, reactor })
    }

    /// Shorthand for [`RuntimeBuilder::new`].
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Returns the worker pool.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns a handle to the reactor, or `None` if it was disabled.
    pub fn reactor(&self) -> Option<&ReactorHandle> {
        self.reactor.as_ref().map(Reactor::handle)
    }

    /// Runs `f` on the worker pool. See [`Scheduler::submit`].
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let runtime = RuntimeBuilder::new().build()?;
    /// let sum = runtime.submit(|| (1..=10).sum::<u32>());
    /// assert_eq!(sum.wait()?, 55);
    /// ```
    pub fn submit<T, F>(&self, f: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.scheduler.submit(f)
    }

    /// Runs a fallible `f` on the worker pool.
    pub fn submit_fallible<T, F>(&self, f: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        self.scheduler.submit_fallible(f)
    }

    /// Runs `callable` through `dispatcher` on the worker pool.
    pub fn dispatch<D>(&self, dispatcher: &Arc<D>, callable: D::Callable) -> Promise<D::Value>
    where
        D: Dispatch,
    {
        self.scheduler.dispatch(dispatcher, callable)
    }

    /// Runs `f` on the worker pool once `delay` has passed.
    ///
    /// The delay is a reactor timer, so no thread waits for it. The task
    /// keeps the transaction current at the time of this call. If the
    /// runtime shuts down first, the promise fails with [`Error::Shutdown`].
    ///
    /// # Panics
    ///
    /// Panics if the runtime was built without a reactor.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let later = runtime.submit_after(Duration::from_millis(10), || "tick");
    /// assert_eq!(later.wait()?, "tick");
    /// ```
    pub fn submit_after<T, F>(&self, delay: Duration, f: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        timed::submit_after(
            self.timer_reactor(),
            self.scheduler.submitter(),
            current_transaction(),
            delay,
            move || Ok(f()),
        )
    }

    /// Runs `f` on the worker pool every `period`, starting after
    /// `initial_delay`.
    ///
    /// Runs are due at `initial_delay + k * period` whether or not the
    /// previous run has finished, so a slow `f` may overlap itself. A run
    /// that panics cancels the task.
    ///
    /// # Panics
    ///
    /// Panics if the runtime was built without a reactor, or if `period`
    /// is zero.
    pub fn submit_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Periodic
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.periodic(Cadence::FixedRate, initial_delay, period, f)
    }

    /// Runs `f` on the worker pool repeatedly, waiting `delay` between the
    /// end of one run and the start of the next.
    ///
    /// Runs never overlap. A run that panics cancels the task.
    ///
    /// # Panics
    ///
    /// Panics if the runtime was built without a reactor, or if `delay` is
    /// zero.
    pub fn submit_with_fixed_delay<F>(
        &self,
        initial_delay: Duration,
        delay: Duration,
        f: F,
    ) -> Periodic
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.periodic(Cadence::FixedDelay, initial_delay, delay, f)
    }

    fn periodic<F>(
        &self,
        cadence: Cadence,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Periodic
    where
        F: Fn() + Send + Sync + 'static,
    {
        Ticker::start(
            self.timer_reactor(),
            self.scheduler.submitter(),
            current_transaction(),
            cadence,
            initial_delay,
            period,
            f,
        )
    }

    fn timer_reactor(&self) -> &ReactorHandle {
        let Some(reactor) = self.reactor() else {
            panic!("timed submission needs the reactor, build the runtime with enable_reactor(true)");
        };

        reactor
    }

    /// Shuts the runtime down.
    ///
    /// This performs the following steps:
    /// 1. Stops the scheduler, running every task already queued
    /// 2. Stops the reactor, failing outstanding socket requests and
    ///    pending timers with [`Error::Shutdown`] and closing every socket
    ///
    /// Calling it more than once is harmless.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();

        if let Some(mut reactor) = self.reactor.take() {
            reactor.shutdown();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
