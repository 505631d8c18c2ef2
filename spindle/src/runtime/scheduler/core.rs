use super::worker::Worker;
use crate::error::{Error, Outcome};
use crate::promise::Promise;
use crate::ring::{CompetingConsumer, IdleGate, RingBuffer};
use crate::runtime::context::{Transaction, current_transaction};
use crate::runtime::job::{Dispatch, FnJob, Pending, Runnable, Task};

use std::hint;
use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Plain configuration a [`Scheduler`] is built from.
///
/// Usually filled in by [`RuntimeBuilder`](crate::RuntimeBuilder); every
/// field has the same default there.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub worker_threads: usize,

    /// Ring capacity. Must be a power of two.
    pub buffer_size: usize,

    /// Claim attempts before a submission runs inline.
    pub produce_spins: u32,

    /// Idle rounds spent busy-spinning.
    pub consume_spins: u32,

    /// Idle rounds spent yielding the time slice.
    pub consume_yields: u32,

    /// Idle rounds spent in timed parks before blocking.
    pub consume_parks: u32,

    /// Length of one timed park.
    pub park_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            buffer_size: 1024,
            produce_spins: 1000,
            consume_spins: 64,
            consume_yields: 10,
            consume_parks: 100,
            park_interval: Duration::from_micros(1),
        }
    }
}

/// State shared between the scheduler handle and its workers.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,

    ring: Arc<RingBuffer<Task>>,

    /// Gates of the workers blocked on `condvar`, indexed by worker id.
    ///
    /// Also guards the decision to sleep in the last backoff tier.
    pub(crate) sleepers: Mutex<Vec<Option<IdleGate>>>,

    pub(crate) condvar: Condvar,

    /// Workers currently blocked (or about to block) on `condvar`.
    pub(crate) waiters: AtomicUsize,

    pub(crate) shutdown: AtomicBool,

    /// Submissions between their shutdown check and their publish.
    producers: AtomicUsize,
}

impl Shared {
    /// Wakes one blocked worker, if any, after a publish.
    fn signal(&self) {
        atomic::fence(Ordering::SeqCst);

        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.sleepers.lock().unwrap();
            self.condvar.notify_one();
        }
    }

    /// Moves the gate of every blocked worker up to the consumed position.
    ///
    /// A blocked worker keeps gating where it fell asleep. Once the awake
    /// workers are a lap ahead the ring looks full even though nothing is
    /// queued. Returns `true` if any gate was released.
    fn release_sleepers(&self) -> bool {
        let sleepers = self.sleepers.lock().unwrap();
        let mut released = false;

        for gate in sleepers.iter().flatten() {
            // Safety: a worker registers its gate only while it holds this
            // lock, and unregisters it before returning from `block`, so
            // every gate listed here belongs to a worker parked in
            // `Condvar::wait` with no slot in hand.
            unsafe { gate.release() };
            released = true;
        }

        released
    }

    fn wake_all(&self) {
        let _guard = self.sleepers.lock().unwrap();
        self.condvar.notify_all();
    }

    /// Publishes `job`, or runs it inline if the ring stays full.
    ///
    /// After shutdown the job is abandoned with [`Error::Shutdown`].
    fn schedule(&self, job: Box<dyn Runnable>, transaction: Option<Transaction>) {
        let _producing = Producing::enter(&self.producers);

        let pending = Pending::new(job, transaction);

        if self.shutdown.load(Ordering::SeqCst) {
            pending.abandon(Error::Shutdown);
            return;
        }

        let mut task = Task::new(pending);
        let mut released = false;

        for _ in 0..=self.config.produce_spins {
            match self.ring.try_publish(task) {
                Ok(_) => {
                    self.signal();
                    return;
                }
                Err(rejected) => task = rejected,
            }

            if !released && self.waiters.load(Ordering::SeqCst) > 0 {
                released = self.release_sleepers();
                continue;
            }

            hint::spin_loop();
        }

        if let Some(pending) = task.take() {
            tracing::warn!(
                spins = self.config.produce_spins,
                "task ring full, running task on the submitting thread"
            );
            pending.execute();
        }
    }
}

/// Owned entry point into a scheduler, for code that outlives a borrow of
/// it, such as timers firing on the reactor thread.
///
/// Submitting after the scheduler shut down abandons the job.
#[derive(Clone)]
pub(crate) struct Submitter {
    shared: Arc<Shared>,
}

impl Submitter {
    /// Queues `job`, running it under `transaction` on a worker.
    pub(crate) fn schedule(&self, job: Box<dyn Runnable>, transaction: Option<Transaction>) {
        self.shared.schedule(job, transaction);
    }
}

/// Keeps a submission visible to `shutdown` until it has published.
struct Producing<'a>(&'a AtomicUsize);

impl<'a> Producing<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Producing<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed pool of worker threads draining a shared ring of tasks.
///
/// Submitting never blocks: a task is written into the ring and picked up
/// by whichever worker claims it first. When the ring stays full for the
/// whole spin budget the task runs on the submitting thread instead.
///
/// Dropping the scheduler shuts it down.
pub struct Scheduler {
    shared: Arc<Shared>,

    /// Join handles for worker threads; each hands its consumer back.
    workers: Mutex<Vec<JoinHandle<CompetingConsumer<Task>>>>,
}

impl Scheduler {
    /// Creates the task ring and starts `config.worker_threads` workers.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool size, ring capacity and the producer and idle
    ///   backoff budgets.
    ///
    /// # Panics
    ///
    /// Panics if `worker_threads` is zero or `buffer_size` is not a power
    /// of two.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a worker thread cannot be spawned.
    pub fn new(config: SchedulerConfig) -> Result<Self, Error> {
        assert!(config.worker_threads > 0, "worker_threads must be > 0");

        let ring = Arc::new(RingBuffer::new(config.buffer_size, Task::default));
        let consumers = ring.subscribe_competing(config.worker_threads);
        let sleepers = consumers.iter().map(|_| None).collect();

        let shared = Arc::new(Shared {
            config,
            ring,
            sleepers: Mutex::new(sleepers),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            producers: AtomicUsize::new(0),
        });

        let scheduler = Self {
            shared: shared.clone(),
            workers: Mutex::new(Vec::with_capacity(consumers.len())),
        };

        for (id, consumer) in consumers.into_iter().enumerate() {
            let worker = Worker::new(id, consumer, shared.clone());

            let handle = thread::Builder::new()
                .name(format!("spindle-worker-{id}"))
                .spawn(move || worker.run())?;

            scheduler.workers.lock().unwrap().push(handle);
        }

        Ok(scheduler)
    }

    /// Returns the configuration the scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Runs `f` asynchronously and returns a promise for its result.
    ///
    /// A panic in `f` settles the promise with [`Error::Panicked`]. After
    /// shutdown the promise fails with [`Error::Shutdown`].
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let answer = scheduler.submit(|| 6 * 7);
    /// assert_eq!(answer.wait().unwrap(), 42);
    /// ```
    pub fn submit<T, F>(&self, f: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_fallible(move || Ok(f()))
    }

    /// Like [`submit`](Self::submit), for work that reports its own errors.
    pub fn submit_fallible<T, F>(&self, f: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        let promise = Promise::new();
        self.schedule(Box::new(FnJob::new(f, promise.clone())));
        promise
    }

    /// Runs `callable` through `dispatcher` asynchronously.
    pub fn dispatch<D>(&self, dispatcher: &Arc<D>, callable: D::Callable) -> Promise<D::Value>
    where
        D: Dispatch,
    {
        let dispatcher = dispatcher.clone();
        self.submit_fallible(move || dispatcher.invoke(&callable))
    }

    fn schedule(&self, job: Box<dyn Runnable>) {
        self.shared.schedule(job, current_transaction());
    }

    /// Returns an owned handle that submits into this scheduler's ring.
    pub(crate) fn submitter(&self) -> Submitter {
        Submitter {
            shared: self.shared.clone(),
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has started.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops the workers and runs whatever is still queued.
    ///
    /// This performs the following steps:
    /// 1. Sets the shutdown flag and wakes every sleeping worker
    /// 2. Joins the workers, which exit once the ring looks empty
    /// 3. Waits for in-progress submissions to publish
    /// 4. Runs leftover tasks on the calling thread
    /// 5. Removes the workers from the ring's gate
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        let shared = &*self.shared;

        if shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.wake_all();

        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let mut consumers = Vec::with_capacity(handles.len());

        for handle in handles {
            match handle.join() {
                Ok(consumer) => consumers.push(consumer),
                Err(_) => tracing::error!("scheduler worker panicked"),
            }
        }

        while shared.producers.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }

        let mut drained = 0usize;
        if let Some(consumer) = consumers.first_mut() {
            while let Some(claimed) = consumer.consume(|_, task| task.take()) {
                if let Some(pending) = claimed {
                    pending.execute();
                    drained += 1;
                }
            }
        }

        tracing::debug!(drained, "scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
