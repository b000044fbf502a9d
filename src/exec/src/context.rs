use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A unit of work handed to an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can be released exactly once.
///
/// Disposal is cooperative and idempotent: calling [`Disposable::dispose`]
/// more than once, from any number of threads, has the same observable
/// effect as calling it once.
pub trait Disposable {
    /// Release the resource. Idempotent.
    fn dispose(&self);

    /// Whether [`Disposable::dispose`] has been called.
    fn is_disposed(&self) -> bool;
}

/// Accepts units of work for later execution, possibly on another thread.
pub trait ExecutionContext: Send + Sync {
    /// Schedule `task` for execution and return its cancellation handle.
    ///
    /// Disposing the handle before the task starts prevents it from running;
    /// disposing it afterwards is a no-op. A context never runs a task more
    /// than once.
    fn schedule(&self, task: Task) -> TaskHandle;
}

/// Cancellation handle for a scheduled task.
#[derive(Clone, Debug, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wrap `task` so that it only runs while the handle is undisposed.
    pub fn guard(&self, task: Task) -> Task {
        let cancelled = Arc::clone(&self.cancelled);
        Box::new(move || {
            if !cancelled.load(Ordering::Acquire) {
                task();
            }
        })
    }
}

impl Disposable for TaskHandle {
    fn dispose(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs tasks inline on the calling thread. Useful in tests and demos where
/// hopping threads would only obscure the behavior under observation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateContext;

impl ImmediateContext {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionContext for ImmediateContext {
    fn schedule(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        task();
        handle
    }
}
