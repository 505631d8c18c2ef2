use super::core::Shared;
use crate::ring::CompetingConsumer;
use crate::runtime::context::set_current_worker;
use crate::runtime::job::Task;

use std::hint;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

/// What an idle worker does before looking for work again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tier {
    Spin,
    Yield,
    Park,
    Block,
}

/// Escalating idle strategy: spin, then yield, then timed park, then block.
///
/// Finding work resets the ladder.
pub(crate) struct Backoff {
    spins: u32,
    yields: u32,
    parks: u32,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(spins: u32, yields: u32, parks: u32) -> Self {
        Self {
            spins,
            yields,
            parks,
            attempt: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the tier for the current idle round and advances the ladder.
    pub(crate) fn step(&mut self) -> Tier {
        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);

        if attempt < self.spins {
            Tier::Spin
        } else if attempt < self.spins + self.yields {
            Tier::Yield
        } else if attempt < self.spins + self.yields + self.parks {
            Tier::Park
        } else {
            Tier::Block
        }
    }
}

/// A scheduler worker thread.
///
/// Each worker owns one competing consumer of the task ring. The loop is:
/// 1. Claim and run a task if one is published
/// 2. Exit if shutdown was requested and nothing is left
/// 3. Otherwise take one step down the backoff ladder
pub(crate) struct Worker {
    /// Index of the worker, exposed through `current_worker()`.
    id: usize,

    consumer: CompetingConsumer<Task>,

    shared: Arc<Shared>,
}

impl Worker {
    /// Wraps one consumer of the task ring.
    ///
    /// # Arguments
    ///
    /// * `id` - Index of this worker, also its slot in `Shared::sleepers`.
    /// * `consumer` - The worker's competing consumer of the task ring.
    /// * `shared` - State shared with the scheduler and the other workers.
    pub(crate) fn new(id: usize, consumer: CompetingConsumer<Task>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            consumer,
            shared,
        }
    }

    /// Runs until shutdown, then hands the consumer back so the scheduler
    /// can drain leftovers and expel it from the gate.
    pub(crate) fn run(mut self) -> CompetingConsumer<Task> {
        set_current_worker(Some(self.id));
        tracing::debug!(worker = self.id, "worker started");

        let config = &self.shared.config;
        let mut backoff = Backoff::new(config.consume_spins, config.consume_yields, config.consume_parks);
        let park_interval = config.park_interval;
        let mut tier = None;

        loop {
            if let Some(claimed) = self.consumer.consume(|_, task| task.take()) {
                if let Some(pending) = claimed {
                    pending.execute();
                }
                backoff.reset();
                tier = None;
                continue;
            }

            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            let next = backoff.step();
            if tier != Some(next) {
                tracing::trace!(worker = self.id, tier = ?next, "worker backing off");
                tier = Some(next);
            }

            match next {
                Tier::Spin => hint::spin_loop(),
                Tier::Yield => thread::yield_now(),
                Tier::Park => thread::park_timeout(park_interval),
                Tier::Block => {
                    self.block();
                    backoff.reset();
                }
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
        set_current_worker(None);

        self.consumer
    }

    /// Sleeps on the condition variable until work or shutdown shows up.
    ///
    /// The waiter count is raised before the final re-check, and producers
    /// read it after publishing; with a full fence on both sides one of
    /// the two always sees the other.
    ///
    /// A sleeping worker still gates the ring. Its cursor is moved up to the
    /// shared position before every wait, and while it sleeps its gate is
    /// listed in `sleepers` so a producer facing a full ring can move it up
    /// again.
    fn block(&mut self) {
        let shared = &*self.shared;
        let mut sleepers = shared.sleepers.lock().unwrap();

        shared.waiters.fetch_add(1, Ordering::SeqCst);
        std::sync::atomic::fence(Ordering::SeqCst);
        sleepers[self.id] = Some(self.consumer.idle_gate());

        while !self.consumer.has_pending() && !shared.shutdown.load(Ordering::SeqCst) {
            self.consumer.release();
            sleepers = shared.condvar.wait(sleepers).unwrap();
        }

        sleepers[self.id] = None;
        shared.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}
