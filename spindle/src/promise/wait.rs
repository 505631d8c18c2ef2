use super::{Promise, Repr, trampoline};
use crate::error::Outcome;

use std::thread;
use std::time::{Duration, Instant};

impl<T: Clone> Promise<T> {
    /// Blocks the calling thread until the promise settles and returns a
    /// copy of its outcome.
    ///
    /// A failed promise comes back as `Err`. Waiting on the NEVER promise
    /// blocks forever.
    ///
    /// Continuations this thread deferred are run first, so waiting from
    /// inside a deeply nested continuation still sees what they settle.
    pub fn wait(&self) -> Outcome<T> {
        trampoline::drain();

        let Repr::Cell(cell) = &self.repr else {
            loop {
                thread::park();
            }
        };

        let mut pending = cell.pending.lock().unwrap();

        loop {
            if let Some(outcome) = cell.value.get() {
                return outcome.clone();
            }

            pending = cell.settled.wait(pending).unwrap();
        }
    }
}

impl<T> Promise<T> {
    /// Blocks for at most `duration` and reports whether the promise
    /// settled in that time.
    ///
    /// Nothing is consumed or cancelled: the promise may still settle
    /// later.
    pub fn timeout(&self, duration: Duration) -> bool {
        trampoline::drain();
        let deadline = Instant::now() + duration;

        let Repr::Cell(cell) = &self.repr else {
            let mut now = Instant::now();
            while now < deadline {
                thread::park_timeout(deadline - now);
                now = Instant::now();
            }
            return false;
        };

        let mut pending = cell.pending.lock().unwrap();

        loop {
            if cell.value.get().is_some() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            pending = cell.settled.wait_timeout(pending, deadline - now).unwrap().0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn wait_returns_failures_as_err() {
        let promise: Promise<u8> = Promise::new();
        let settler = promise.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            settler.settle(Err(Error::Closed));
        });

        assert!(matches!(promise.wait(), Err(Error::Closed)));
        handle.join().unwrap();
    }

    #[test]
    fn timeout_reports_late_settlement() {
        let promise: Promise<u8> = Promise::new();
        assert!(!promise.timeout(Duration::from_millis(10)));

        promise.settle(Ok(1));
        assert!(promise.timeout(Duration::ZERO));
    }
}
