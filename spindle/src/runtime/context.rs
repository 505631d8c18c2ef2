use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

/// Opaque transaction context attached to scheduled work.
///
/// The scheduler never looks inside: it captures the submitter's current
/// transaction when a task is submitted and restores it on whichever thread
/// ends up running the task.
#[derive(Clone)]
pub struct Transaction(Arc<dyn Any + Send + Sync>);

impl Transaction {
    /// Wraps an arbitrary context value.
    pub fn new<T>(context: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(Arc::new(context))
    }

    /// Returns the context value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transaction")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

thread_local! {
    /// Transaction the current thread is running under, if any.
    ///
    /// Captured by `submit` and re-installed around the task on the
    /// executing thread.
    static CURRENT_TRANSACTION: RefCell<Option<Transaction>> = const { RefCell::new(None) };

    /// Identifier of the current worker thread; `None` off the pool.
    static CURRENT_WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Puts the previous transaction back when the scope ends, even on unwind.
struct Restore(Option<Transaction>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_TRANSACTION.with(|current| *current.borrow_mut() = previous);
    }
}

/// Runs `f` with `transaction` installed as the current transaction.
///
/// Tasks submitted from inside `f` carry the transaction with them. The
/// previous context is restored afterwards.
///
/// # Examples
///
/// ```rust,ignore
/// with_transaction(Transaction::new(42u64), || {
///     runtime.submit(|| current_transaction());
/// });
/// ```
pub fn with_transaction<R>(transaction: Transaction, f: impl FnOnce() -> R) -> R {
    enter_transaction(Some(transaction), f)
}

/// Runs `f` with `transaction` installed, which may clear it.
pub(crate) fn enter_transaction<R>(
    transaction: Option<Transaction>,
    f: impl FnOnce() -> R,
) -> R {
    let previous = CURRENT_TRANSACTION.with(|current| current.replace(transaction));
    let _restore = Restore(previous);

    f()
}

/// Returns the transaction the calling thread is running under.
pub fn current_transaction() -> Option<Transaction> {
    CURRENT_TRANSACTION.with(|current| current.borrow().clone())
}

/// Returns the index of the scheduler worker running the calling thread,
/// or `None` on any other thread.
pub fn current_worker() -> Option<usize> {
    CURRENT_WORKER_ID.with(Cell::get)
}

pub(crate) fn set_current_worker(id: Option<usize>) {
    CURRENT_WORKER_ID.with(|current| current.set(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transactions_nest_and_restore() {
        assert!(current_transaction().is_none());

        let outer = Transaction::new("outer");
        let inner = Transaction::new(7u32);

        with_transaction(outer.clone(), || {
            assert!(current_transaction().unwrap().ptr_eq(&outer));

            with_transaction(inner.clone(), || {
                let current = current_transaction().unwrap();
                assert_eq!(current.downcast_ref::<u32>(), Some(&7));
            });

            assert!(current_transaction().unwrap().ptr_eq(&outer));
        });

        assert!(current_transaction().is_none());
    }

    #[test]
    fn transaction_is_restored_after_a_panic() {
        let result = std::panic::catch_unwind(|| {
            with_transaction(Transaction::new(()), || panic!("inside"));
        });

        assert!(result.is_err());
        assert!(current_transaction().is_none());
    }

    #[test]
    fn plain_threads_are_not_workers() {
        assert_eq!(current_worker(), None);
    }
}
