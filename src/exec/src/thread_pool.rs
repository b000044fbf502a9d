//! Dedicated worker-thread pool with named threads.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::context::{ExecutionContext, Task, TaskHandle};

/// A fixed-size pool of worker threads fed from an unbounded channel.
///
/// Worker threads are named `{name}-{index}` so that a callback can discover
/// which context it is running on via `std::thread::current().name()`. The
/// thread-isolation tests of the stream engine rely on this.
pub struct ThreadPool {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `threads` workers named after `name`.
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        let name = name.into();
        let (sender, receiver) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver: Receiver<Task> = receiver.clone();
            let thread_name = format!("{name}-{index}");
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&receiver))
                .unwrap_or_else(|e| panic!("spawn worker {thread_name}: {e}"));
            workers.push(handle);
        }
        Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting tasks, let queued tasks finish, and join the workers.
    ///
    /// Idempotent; later calls return immediately. Must not be called from
    /// one of the pool's own worker threads.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().expect("thread pool sender poisoned").take();
        drop(sender);
        let workers = std::mem::take(&mut *self.workers.lock().expect("thread pool workers poisoned"));
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!(pool = %self.name, "worker thread panicked");
            }
        }
    }
}

impl ExecutionContext for ThreadPool {
    fn schedule(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let guarded = handle.guard(task);
        let sender = self.sender.lock().expect("thread pool sender poisoned");
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(guarded).is_err() {
                    tracing::warn!(pool = %self.name, "task submitted after shutdown was dropped");
                }
            }
            None => {
                tracing::warn!(pool = %self.name, "task submitted after shutdown was dropped");
            }
        }
        handle
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Disconnect the channel so workers exit; joining is left to an
        // explicit shutdown() because drop may run on a worker thread.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

fn worker_loop(receiver: &Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(
                thread = %std::thread::current().name().unwrap_or("unnamed"),
                "scheduled task panicked"
            );
        }
    }
}
