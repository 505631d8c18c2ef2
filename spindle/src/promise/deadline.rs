use super::Promise;
use crate::error::Error;
use crate::reactor::{ReactorHandle, TimerAction};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns a promise that follows this one, but fails with
    /// [`Error::Timeout`] if it has not settled within `duration`.
    ///
    /// Nothing blocks: the deadline is a timer on the reactor thread. This
    /// promise itself is left untouched and may still settle later; only
    /// the returned one gives up. If the reactor stops before either
    /// happens, the returned promise fails with [`Error::Shutdown`].
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let reactor = runtime.reactor().unwrap();
    /// let slow = runtime.submit(|| expensive());
    ///
    /// match slow.deadline(reactor, Duration::from_secs(1)).wait() {
    ///     Err(Error::Timeout) => println!("gave up"),
    ///     other => println!("{other:?}"),
    /// }
    /// ```
    pub fn deadline(&self, reactor: &ReactorHandle, duration: Duration) -> Promise<T> {
        let bounded = Promise::new();
        let cancelled = Arc::new(AtomicBool::new(false));

        {
            let target = bounded.clone();
            let cancelled = cancelled.clone();

            self.on_settle(move |outcome| {
                cancelled.store(true, Ordering::Release);
                let _ = target.offer(outcome.clone());
            });
        }

        if bounded.is_settled() {
            return bounded;
        }

        let target = bounded.clone();
        let action: TimerAction = Box::new(move |outcome| {
            let error = outcome.err().unwrap_or(Error::Timeout);
            let _ = target.offer(Err(error));
        });

        if !reactor.set_timer(Instant::now() + duration, Some(cancelled), action) {
            let _ = bounded.offer(Err(Error::Shutdown));
        }

        bounded
    }
}
