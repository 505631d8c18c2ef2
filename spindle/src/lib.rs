//! # Spindle
//!
//! **Spindle** is the task-execution substrate of a language runtime: it runs
//! opaque callables on a pool of OS threads, hands results back as
//! single-assignment [`Promise`]s, and bridges non-blocking sockets into the
//! same promise model through a dedicated reactor thread.
//!
//! It does not know what the callables compute. The evaluator plugs in
//! through the [`Dispatch`] trait, and an optional [`Transaction`] context
//! is carried from the submitting thread to the worker untouched.
//!
//! Spindle is built from a few small pieces:
//!
//! - A **lock-free ring buffer** with multi-producer claims and single,
//!   competing and group consumer protocols ([`ring`])
//! - A **fixed worker pool** draining the ring, with a spin, yield, park and
//!   block idle ladder ([`Scheduler`])
//! - **Promises** with continuations, combinators and blocking waits
//!   ([`Promise`])
//! - A **socket reactor** on one `epoll` thread, serving queued requests
//!   ([`ReactorHandle`], [`net`]) and timers for deadlines, delayed and
//!   periodic work ([`Promise::deadline`], [`Runtime::submit_after`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spindle::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(4).build()?;
//!
//! let answer = runtime
//!     .submit(|| 6 * 7)
//!     .map(|n| n.to_string());
//!
//! assert_eq!(answer.wait()?, "42");
//! ```
//!
//! ## Modules
//!
//! - [`ring`]: Cursors, membership aggregates, the ring buffer and consumers
//! - [`promise`]: Single-assignment values and their combinators
//! - [`net`]: TCP listener and connection served by the reactor
//!
//! ## Logging
//!
//! Spindle reports through [`tracing`]; it never installs a subscriber.

mod error;
mod reactor;
mod runtime;
mod utils;

pub mod net;
pub mod promise;
pub mod ring;

pub use error::{Error, Outcome};
pub use promise::Promise;
pub use reactor::{ReactorConfig, ReactorHandle};
pub use runtime::builder::RuntimeBuilder;
pub use runtime::context::{Transaction, current_transaction, current_worker, with_transaction};
pub use runtime::core::Runtime;
pub use runtime::job::Dispatch;
pub use runtime::scheduler::{Scheduler, SchedulerConfig};
pub use runtime::timed::Periodic;
