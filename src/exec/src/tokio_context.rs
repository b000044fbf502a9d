//! Execution context backed by a tokio runtime.

use tokio::runtime::Handle;

use crate::context::{ExecutionContext, Task, TaskHandle};

/// Schedules work onto a tokio runtime.
///
/// Tasks are plain closures that may park the thread (the engine's drain
/// loops deliver elements synchronously), so they are submitted through
/// `spawn_blocking` rather than as async tasks.
#[derive(Clone, Debug)]
pub struct TokioContext {
    handle: Handle,
}

impl TokioContext {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Capture the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl ExecutionContext for TokioContext {
    fn schedule(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let guarded = handle.guard(task);
        self.handle.spawn_blocking(guarded);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn schedules_onto_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let context = TokioContext::new(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();
        context.schedule(Box::new(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
