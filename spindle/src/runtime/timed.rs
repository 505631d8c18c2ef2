use super::context::Transaction;
use super::job::{FnJob, Runnable};
use super::scheduler::Submitter;
use crate::error::{Error, Outcome};
use crate::promise::Promise;
use crate::reactor::{ReactorHandle, TimerAction};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// Schedules `f` on the worker pool once `delay` has passed.
pub(crate) fn submit_after<T, F>(
    reactor: &ReactorHandle,
    submitter: Submitter,
    transaction: Option<Transaction>,
    delay: Duration,
    f: F,
) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Outcome<T> + Send + 'static,
{
    let promise = Promise::new();
    let job: Box<dyn Runnable> = Box::new(FnJob::new(f, promise.clone()));

    let action: TimerAction = Box::new(move |outcome| match outcome {
        Ok(()) => submitter.schedule(job, transaction),
        Err(error) => job.abandon(error),
    });

    if !reactor.set_timer(Instant::now() + delay, None, action) {
        let _ = promise.offer(Err(Error::Shutdown));
    }

    promise
}

/// When the next run of a periodic task is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cadence {
    /// `period` after the previous run was due, whether or not it finished.
    FixedRate,

    /// `period` after the previous run finished.
    FixedDelay,
}

/// Handle to a task submitted with
/// [`Runtime::submit_at_fixed_rate`](crate::Runtime::submit_at_fixed_rate)
/// or [`Runtime::submit_with_fixed_delay`](crate::Runtime::submit_with_fixed_delay).
///
/// Dropping the handle does not stop the task; call [`cancel`](Self::cancel).
#[derive(Debug, Clone)]
pub struct Periodic {
    cancelled: Arc<AtomicBool>,
}

impl Periodic {
    /// Stops scheduling further runs.
    ///
    /// A run that already started finishes normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once no further run will be scheduled: after
    /// [`cancel`](Self::cancel), after a run panicked or failed, or after
    /// the runtime shut down.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Re-arms itself on the reactor after every tick.
pub(crate) struct Ticker<F> {
    f: Arc<F>,
    period: Duration,
    cadence: Cadence,
    reactor: ReactorHandle,
    submitter: Submitter,
    transaction: Option<Transaction>,
    cancelled: Arc<AtomicBool>,
}

impl<F> Ticker<F>
where
    F: Fn() + Send + Sync + 'static,
{
    /// Starts a periodic task whose first run is due after `initial_delay`.
    ///
    /// # Arguments
    ///
    /// * `reactor` - Reactor whose timers drive the ticks.
    /// * `submitter` - Worker pool each run is submitted to.
    /// * `transaction` - Context every run executes under.
    /// * `cadence` - Whether `period` counts from due times or from the
    ///   end of each run.
    /// * `initial_delay` - Delay before the first run.
    /// * `period` - Spacing between runs.
    /// * `f` - The task body.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub(crate) fn start(
        reactor: &ReactorHandle,
        submitter: Submitter,
        transaction: Option<Transaction>,
        cadence: Cadence,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Periodic {
        assert!(!period.is_zero(), "period must be non-zero");

        let cancelled = Arc::new(AtomicBool::new(false));

        let ticker = Arc::new(Self {
            f: Arc::new(f),
            period,
            cadence,
            reactor: reactor.clone(),
            submitter,
            transaction,
            cancelled: cancelled.clone(),
        });

        ticker.arm(Instant::now() + initial_delay);

        Periodic { cancelled }
    }

    fn arm(self: Arc<Self>, deadline: Instant) {
        let cancelled = self.cancelled.clone();
        let reactor = self.reactor.clone();

        let ticker = self.clone();
        let action: TimerAction = Box::new(move |outcome| ticker.tick(deadline, outcome));

        if !reactor.set_timer(deadline, Some(cancelled), action) {
            self.stop(&Error::Shutdown);
        }
    }

    fn tick(self: Arc<Self>, deadline: Instant, outcome: Outcome<()>) {
        if let Err(error) = outcome {
            self.stop(&error);
            return;
        }

        if self.cancelled.load(Ordering::Acquire) {
            return;
        }

        let run: Promise<()> = Promise::new();
        let f = self.f.clone();
        let job: Box<dyn Runnable> = Box::new(FnJob::new(
            move || -> Outcome<()> {
                f();
                Ok(())
            },
            run.clone(),
        ));

        match self.cadence {
            Cadence::FixedRate => {
                let ticker = self.clone();
                run.on_settle(move |outcome| {
                    if let Err(error) = outcome {
                        ticker.stop(error);
                    }
                });

                self.clone().arm(deadline + self.period);
            }

            Cadence::FixedDelay => {
                let ticker = self.clone();
                run.on_settle(move |outcome| match outcome {
                    Ok(()) => {
                        let next = Instant::now() + ticker.period;
                        ticker.arm(next);
                    }
                    Err(error) => ticker.stop(error),
                });
            }
        }

        self.submitter.schedule(job, self.transaction.clone());
    }

    fn stop(&self, error: &Error) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        match error {
            Error::Shutdown => debug!("periodic task stopped by shutdown"),
            error => error!(%error, "periodic task failed, cancelling it"),
        }
    }
}
