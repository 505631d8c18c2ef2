use crate::error::Error;
use crate::promise::Promise;
use crate::ring::{RingBuffer, SingleConsumer};

use std::hint;
use std::sync::{Arc, Mutex};

/// A request that can be failed without being served.
pub(crate) trait Request: Send + 'static {
    /// Settles the request's promise with `error`, unless it already
    /// settled.
    fn fail(self, error: Error);
}

impl<T> Request for Promise<T>
where
    T: Send + Sync + 'static,
{
    fn fail(self, error: Error) {
        let _ = self.offer(Err(error));
    }
}

/// Bounded multi-producer, single-consumer queue of socket requests.
///
/// Any thread may push; only the reactor pops during normal operation. The
/// consumer sits behind a mutex so that submitters can also drain the
/// queue when they discover the source is gone.
pub(crate) struct RequestQueue<R> {
    ring: Arc<RingBuffer<Option<R>>>,
    consumer: Mutex<SingleConsumer<Option<R>>>,

    /// Publish attempts before a push gives up.
    spins: u32,
}

impl<R: Request> RequestQueue<R> {
    /// Creates a queue holding up to `capacity` requests.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub(crate) fn new(capacity: usize, spins: u32) -> Self {
        let ring = Arc::new(RingBuffer::new(capacity, || None));
        let consumer = Mutex::new(ring.subscribe_single());

        Self {
            ring,
            consumer,
            spins,
        }
    }

    /// Enqueues `request`.
    ///
    /// If the queue stays full for the whole spin budget the request is
    /// failed with [`Error::QueueFull`] and `false` is returned.
    pub(crate) fn push(&self, request: R) -> bool {
        let mut item = Some(request);

        for _ in 0..=self.spins {
            match self.ring.try_publish(item) {
                Ok(_) => return true,
                Err(rejected) => item = rejected,
            }

            hint::spin_loop();
        }

        tracing::warn!(
            capacity = self.ring.capacity(),
            "request queue full, failing request"
        );

        if let Some(request) = item {
            request.fail(Error::QueueFull);
        }
        false
    }

    /// Takes the oldest queued request.
    pub(crate) fn pop(&self) -> Option<R> {
        let mut taken = None;

        self.consumer.lock().unwrap().consume(|_, slot, _| {
            taken = slot.take();
            false
        });

        taken
    }

    /// Returns `true` if a request is waiting.
    pub(crate) fn has_pending(&self) -> bool {
        self.consumer.lock().unwrap().has_pending()
    }

    /// Fails every queued request with `error`.
    pub(crate) fn drain(&self, error: &Error) -> usize {
        let mut failed = 0;

        while let Some(request) = self.pop() {
            request.fail(error.clone());
            failed += 1;
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_come_out_in_order() {
        let queue = RequestQueue::new(4, 0);
        let first = Promise::<u8>::new();
        let second = Promise::<u8>::new();

        assert!(queue.push(first.clone()));
        assert!(queue.push(second.clone()));
        assert!(queue.has_pending());

        queue.pop().unwrap().settle(Ok(1));
        queue.pop().unwrap().settle(Ok(2));

        assert!(queue.pop().is_none());
        assert_eq!(first.peek().unwrap().unwrap(), 1);
        assert_eq!(second.peek().unwrap().unwrap(), 2);
    }

    #[test]
    fn full_queue_fails_the_request() {
        let queue = RequestQueue::new(2, 3);
        assert!(queue.push(Promise::<u8>::new()));
        assert!(queue.push(Promise::<u8>::new()));

        let rejected = Promise::<u8>::new();
        assert!(!queue.push(rejected.clone()));
        assert!(matches!(rejected.peek(), Some(Err(Error::QueueFull))));

        queue.pop();
        assert!(queue.push(Promise::<u8>::new()), "space is reclaimed");
    }

    #[test]
    fn drain_fails_everything_queued() {
        let queue = RequestQueue::new(8, 0);
        let promises: Vec<_> = (0..3).map(|_| Promise::<u8>::new()).collect();
        for promise in &promises {
            queue.push(promise.clone());
        }

        assert_eq!(queue.drain(&Error::Closed), 3);
        for promise in promises {
            assert!(matches!(promise.peek(), Some(Err(Error::Closed))));
        }
        assert!(!queue.has_pending());
    }
}
