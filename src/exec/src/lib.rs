//! Execution contexts: an abstraction over "run this unit of work later,
//! possibly on another thread", returning a disposable handle.
//!
//! The stream engine never owns threads itself; it hands closures to an
//! [`ExecutionContext`] and relies on the returned [`TaskHandle`] for
//! cooperative cancellation. Three reference contexts are provided:
//!
//! - [`ThreadPool`]: a named pool of dedicated worker threads fed by a
//!   crossbeam channel. Thread names are `{pool}-{index}`, which lets tests
//!   assert which context a callback ran on.
//! - [`TokioContext`]: schedules work onto a tokio runtime via
//!   `spawn_blocking`.
//! - [`ImmediateContext`]: runs the task inline on the calling thread.

pub mod context;
pub mod thread_pool;
pub mod tokio_context;

pub use context::{Disposable, ExecutionContext, ImmediateContext, Task, TaskHandle};
pub use thread_pool::ThreadPool;
pub use tokio_context::TokioContext;
