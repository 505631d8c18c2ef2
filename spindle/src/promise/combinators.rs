use super::Promise;
use crate::error::{Error, Outcome};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Runs `f`, turning a panic into [`Error::Panicked`].
fn guarded<R>(f: impl FnOnce() -> Outcome<R>) -> Outcome<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns a promise settled with `f(value)` once this one succeeds.
    ///
    /// A failure of this promise is passed through unchanged; a panic in `f`
    /// settles the derived promise with [`Error::Panicked`]. If this promise
    /// is already settled, `f` runs before `map` returns.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Ok(f(value)))
    }

    /// Like [`map`](Self::map), for functions that may fail.
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        if self.is_never() {
            return Promise::never();
        }

        let derived = Promise::new();
        let target = derived.clone();

        self.on_settle(move |outcome| {
            let result = match outcome {
                Ok(value) => {
                    let value = value.clone();
                    guarded(move || f(value))
                }
                Err(error) => Err(error.clone()),
            };

            target.settle(result);
        });

        derived
    }

    /// Chains an asynchronous step: the derived promise follows the one `f`
    /// returns.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        if self.is_never() {
            return Promise::never();
        }

        let derived = Promise::new();
        let target = derived.clone();

        self.on_settle(move |outcome| match outcome {
            Ok(value) => {
                let value = value.clone();

                match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                    Ok(next) => next.on_settle(move |outcome| target.settle(outcome.clone())),
                    Err(payload) => target.settle(Err(Error::from_panic(payload))),
                }
            }
            Err(error) => target.settle(Err(error.clone())),
        });

        derived
    }

    /// Gives `f` a chance to replace a failure with a new outcome.
    ///
    /// Successful values pass through untouched.
    pub fn recover<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Outcome<T> + Send + 'static,
    {
        if self.is_never() {
            return Promise::never();
        }

        let derived = Promise::new();
        let target = derived.clone();

        self.on_settle(move |outcome| {
            let result = match outcome {
                Ok(value) => Ok(value.clone()),
                Err(error) => {
                    let error = error.clone();
                    guarded(move || f(error))
                }
            };

            target.settle(result);
        });

        derived
    }

    /// Joins several promises into one holding every value, in input order.
    ///
    /// Fails with the first failure observed. If any input is the NEVER
    /// promise the result never settles; an empty input settles at once.
    pub fn all<I>(promises: I) -> Promise<Vec<T>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();

        if promises.is_empty() {
            return Promise::ready(Vec::new());
        }
        if promises.iter().any(Promise::is_never) {
            return Promise::never();
        }

        let derived = Promise::new();
        let values = Arc::new(Mutex::new(vec![None; promises.len()]));
        let remaining = Arc::new(AtomicUsize::new(promises.len()));

        for (index, promise) in promises.into_iter().enumerate() {
            let target = derived.clone();
            let values = values.clone();
            let remaining = remaining.clone();

            promise.on_settle(move |outcome| match outcome {
                Ok(value) => {
                    values.lock().unwrap()[index] = Some(value.clone());

                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        let collected = std::mem::take(&mut *values.lock().unwrap())
                            .into_iter()
                            .flatten()
                            .collect();
                        let _ = target.offer(Ok(collected));
                    }
                }
                Err(error) => {
                    let _ = target.offer(Err(error.clone()));
                }
            });
        }

        derived
    }
}
