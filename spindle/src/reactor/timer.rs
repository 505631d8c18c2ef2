use crate::error::{Error, Outcome};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool};
use std::time::{Duration, Instant};

/// What a timer does when it fires: `Ok(())` at its deadline, or the error
/// that stopped the reactor before it got there.
///
/// Runs on the reactor thread, so it must only settle a promise or hand
/// work to the scheduler.
pub(crate) type TimerAction = Box<dyn FnOnce(Outcome<()>) + Send>;

pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) action: TimerAction,

    /// Set by whoever no longer needs the timer; it is then dropped silently.
    pub(crate) cancelled: Option<Arc<AtomicBool>>,
}

impl TimerEntry {
    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(atomic::Ordering::Acquire))
    }
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending timers of the reactor, earliest deadline first.
#[derive(Default)]
pub(crate) struct Timers {
    heap: BinaryHeap<TimerEntry>,
}

impl Timers {
    pub(crate) fn push(&mut self, entry: TimerEntry) {
        self.heap.push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// How long the poller may sleep before the earliest timer is due.
    ///
    /// `None` means no timer is pending and the poller may block.
    pub(crate) fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|timer| timer.deadline.saturating_duration_since(now))
    }

    /// Runs every timer due at `now`. Returns how many fired.
    pub(crate) fn fire_expired(&mut self, now: Instant) -> usize {
        let mut fired = 0;

        while self.heap.peek().is_some_and(|timer| timer.deadline <= now) {
            let Some(timer) = self.heap.pop() else {
                break;
            };

            if timer.is_cancelled() {
                continue;
            }

            (timer.action)(Ok(()));
            fired += 1;
        }

        fired
    }

    /// Hands `error` to every timer that was not cancelled.
    pub(crate) fn abandon_all(&mut self, error: &Error) -> usize {
        let mut abandoned = 0;

        for timer in self.heap.drain() {
            if !timer.is_cancelled() {
                (timer.action)(Err(error.clone()));
                abandoned += 1;
            }
        }

        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<(u32, bool)>>>, id: u32) -> TimerAction {
        let log = log.clone();
        Box::new(move |outcome| log.lock().unwrap().push((id, outcome.is_ok())))
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let mut timers = Timers::default();

        for (id, ms) in [(1, 30), (2, 10), (3, 20)] {
            timers.push(TimerEntry {
                deadline: start + Duration::from_millis(ms),
                action: recording(&log, id),
                cancelled: None,
            });
        }

        assert_eq!(timers.next_timeout(start), Some(Duration::from_millis(10)));
        assert_eq!(timers.fire_expired(start + Duration::from_millis(25)), 2);
        assert_eq!(*log.lock().unwrap(), vec![(2, true), (3, true)]);

        assert_eq!(timers.len(), 1);
        assert_eq!(
            timers.next_timeout(start + Duration::from_millis(40)),
            Some(Duration::ZERO),
            "an overdue timer asks for an immediate poll"
        );
    }

    #[test]
    fn cancelled_timers_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let now = Instant::now();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut timers = Timers::default();

        timers.push(TimerEntry {
            deadline: now,
            action: recording(&log, 1),
            cancelled: Some(cancelled.clone()),
        });
        timers.push(TimerEntry {
            deadline: now + Duration::from_secs(60),
            action: recording(&log, 2),
            cancelled: Some(cancelled.clone()),
        });
        cancelled.store(true, atomic::Ordering::Release);

        assert_eq!(timers.fire_expired(now), 0);
        assert_eq!(timers.abandon_all(&Error::Shutdown), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(timers.next_timeout(now), None);
    }

    #[test]
    fn abandoned_timers_see_the_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timers = Timers::default();

        timers.push(TimerEntry {
            deadline: Instant::now() + Duration::from_secs(60),
            action: recording(&log, 7),
            cancelled: None,
        });

        assert_eq!(timers.abandon_all(&Error::Shutdown), 1);
        assert_eq!(*log.lock().unwrap(), vec![(7, false)]);
        assert_eq!(timers.len(), 0);
    }
}
