use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

type Job = Box<dyn FnOnce()>;

/// Continuations nested deeper than this are queued instead of run.
const MAX_DEPTH: usize = 32;

thread_local! {
    /// Number of jobs currently running on this thread, innermost included.
    static DEPTH: Cell<usize> = const { Cell::new(0) };

    /// Jobs deferred because they would have nested past `MAX_DEPTH`.
    static QUEUE: RefCell<VecDeque<Job>> = const { RefCell::new(VecDeque::new()) };
}

/// Runs `job` right away, or defers it if this thread is already
/// `MAX_DEPTH` jobs deep.
///
/// Deferred jobs run when the outermost job returns, or earlier if
/// something on this thread calls [`drain`]. Chains of any length therefore
/// run in bounded stack space, while short ones behave like plain calls.
pub(super) fn run(job: Job) {
    if DEPTH.get() >= MAX_DEPTH {
        QUEUE.with_borrow_mut(|queue| queue.push_back(job));
        return;
    }

    execute(job);

    if DEPTH.get() == 0 {
        drain();
    }
}

/// Runs every deferred job of this thread, including ones they defer.
///
/// Called before a thread blocks on a promise, since the job that would
/// settle it may be sitting in this queue.
pub(super) fn drain() {
    while let Some(job) = QUEUE.with_borrow_mut(VecDeque::pop_front) {
        execute(job);
    }
}

fn execute(job: Job) {
    DEPTH.set(DEPTH.get() + 1);
    let result = panic::catch_unwind(AssertUnwindSafe(job));
    DEPTH.set(DEPTH.get() - 1);

    if let Err(payload) = result {
        let error = crate::Error::from_panic(payload);
        tracing::error!(%error, "promise continuation panicked");
    }
}
