use super::core::Runtime;
use super::scheduler::SchedulerConfig;
use crate::error::Error;
use crate::reactor::ReactorConfig;

use std::time::Duration;

/// Builder for configuring and creating a runtime.
///
/// `RuntimeBuilder` allows customizing runtime parameters before
/// constructing the runtime: the size of the worker pool, the task ring,
/// the idle backoff ladder, and whether the I/O reactor is started.
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new()
///     .worker_threads(4)
///     .buffer_size(4096)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    scheduler: SchedulerConfig,

    /// `None` when the reactor is disabled.
    reactor: Option<ReactorConfig>,
}

impl RuntimeBuilder {
    /// Creates a new `RuntimeBuilder` with default configuration.
    ///
    /// By default, the number of worker threads is set to the number
    /// of available logical CPUs, falling back to `1` if unavailable,
    /// and the reactor is enabled.
    pub fn new() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            reactor: Some(ReactorConfig::default()),
        }
    }

    /// Sets the number of worker threads used by the runtime.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.scheduler.worker_threads = n;
        self
    }

    /// Sets the number of slots in the task ring.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two.
    pub fn buffer_size(mut self, size: usize) -> Self {
        assert!(size.is_power_of_two(), "buffer_size must be a power of two");

        self.scheduler.buffer_size = size;
        self
    }

    /// Sets how many times a submission retries a full ring before running
    /// the task on the submitting thread.
    pub fn produce_spins(mut self, spins: u32) -> Self {
        self.scheduler.produce_spins = spins;
        self
    }

    /// Sets the idle backoff ladder of the workers: rounds spent spinning,
    /// yielding and parking before blocking on the condition variable.
    pub fn consume_backoff(mut self, spins: u32, yields: u32, parks: u32) -> Self {
        self.scheduler.consume_spins = spins;
        self.scheduler.consume_yields = yields;
        self.scheduler.consume_parks = parks;
        self
    }

    /// Sets the length of one timed park in the backoff ladder.
    pub fn park_interval(mut self, interval: Duration) -> Self {
        self.scheduler.park_interval = interval;
        self
    }

    /// Enables or disables the I/O reactor thread.
    pub fn enable_reactor(mut self, enabled: bool) -> Self {
        self.reactor = match enabled {
            true => Some(self.reactor.take().unwrap_or_default()),
            false => None,
        };
        self
    }

    /// Sets the capacity of each per-connection read and write queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn request_queue_capacity(mut self, capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "request_queue_capacity must be a power of two"
        );

        if let Some(reactor) = self.reactor.as_mut() {
            reactor.request_queue_capacity = capacity;
        }
        self
    }

    /// Sets the capacity of each listener's accept queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn accept_queue_capacity(mut self, capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "accept_queue_capacity must be a power of two"
        );

        if let Some(reactor) = self.reactor.as_mut() {
            reactor.accept_queue_capacity = capacity;
        }
        self
    }

    /// Returns the scheduler part of the configuration.
    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// Builds the runtime with the configured options.
    ///
    /// This starts the worker threads and, if enabled, the reactor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a thread, the epoll instance or the
    /// wake-up eventfd cannot be created.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::new(self.scheduler, self.reactor)
    }
}

impl Default for RuntimeBuilder {
    /// Creates a default `RuntimeBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
