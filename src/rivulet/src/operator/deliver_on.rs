//! Thread-hop operator: bounded-queue handoff between execution contexts.
//!
//! Upstream signals land in a bounded lock-free queue; a single-flight
//! drain task scheduled on the delivery context dequeues and delivers them
//! downstream while demand allows. The work-in-progress counter guarantees
//! at most one drain task exists per stage at any instant: a signal that
//! arrives while a drain is active only marks more work pending.
//!
//! Optionally, demand signals from the downstream are themselves dispatched
//! onto a separate request context, so that request-handling logic never
//! runs on the delivery context's threads (or on whatever thread happened
//! to call `request`), and upstream production is never delayed by a slow
//! downstream demand path.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_queue::ArrayQueue;
use exec::ExecutionContext;

use crate::demand;
use crate::diagnostics;
use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{Publisher, Subscriber, Subscription};

use super::Source;

/// Configuration for the thread-hop operator.
#[derive(Clone)]
pub struct HopConfig {
    context: Arc<dyn ExecutionContext>,
    request_context: Option<Arc<dyn ExecutionContext>>,
    capacity: usize,
}

impl HopConfig {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context,
            request_context: None,
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Dispatch downstream `request` signals (and upstream refill requests)
    /// on `context` instead of the calling thread.
    pub fn with_request_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.request_context = Some(context);
        self
    }

    /// Handoff queue capacity. Must be positive.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "handoff queue capacity must be positive");
        self.capacity = capacity;
        self
    }
}

pub struct DeliverOnSource<T> {
    upstream: Arc<dyn Source<T>>,
    config: HopConfig,
}

impl<T> DeliverOnSource<T> {
    pub fn new(upstream: Arc<dyn Source<T>>, config: HopConfig) -> Self {
        Self { upstream, config }
    }
}

impl<T> Scan for DeliverOnSource<T>
where
    T: Send + Sync,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => Some(AttrValue::Stage(StageRef::new(self.upstream.clone()))),
            Attr::Capacity | Attr::Prefetch => Some(AttrValue::Int(self.config.capacity)),
            _ => None,
        }
    }
}

impl<T> Publisher<T> for DeliverOnSource<T>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let config = self.config.clone();
        let stage = Arc::new_cyclic(|this: &Weak<DeliverOnStage<T>>| DeliverOnStage {
            this: this.clone(),
            downstream: subscriber,
            context: Arc::clone(&config.context),
            request_context: config.request_context.clone(),
            queue: ArrayQueue::new(config.capacity),
            capacity: config.capacity,
            limit: (config.capacity - (config.capacity >> 2)) as u64,
            requested: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            upstream: Mutex::new(None),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            upstream_cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        self.upstream.subscribe(stage);
    }
}

/// State machine: INIT -> ACTIVE -> (DRAINING <-> IDLE) -> TERMINATED.
/// DRAINING/IDLE are encoded in `wip` (nonzero means a drain task exists);
/// TERMINATED leaves `wip` permanently nonzero so no further task is ever
/// scheduled.
struct DeliverOnStage<T> {
    this: Weak<Self>,
    downstream: Arc<dyn Subscriber<T>>,
    context: Arc<dyn ExecutionContext>,
    request_context: Option<Arc<dyn ExecutionContext>>,
    queue: ArrayQueue<T>,
    capacity: usize,
    /// Upstream replenishment threshold: three quarters of the capacity.
    limit: u64,
    requested: AtomicU64,
    /// Elements delivered since the last upstream refill. Only mutated by
    /// the thread holding the drain right.
    consumed: AtomicU64,
    wip: AtomicUsize,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    error: Mutex<Option<StreamError>>,
    cancelled: AtomicBool,
    upstream_cancelled: AtomicBool,
    done: AtomicBool,
}

impl<T> DeliverOnStage<T>
where
    T: Send + Sync + 'static,
{
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().expect("upstream lock poisoned").clone()
    }

    /// Mark work pending; schedule a drain task only when none exists.
    fn try_schedule(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.context.schedule(Box::new(move || this.drain()));
        }
    }

    fn drain(&self) {
        let mut missed = 1;
        loop {
            let mut emitted: u64 = 0;
            loop {
                if self.cancelled.load(Ordering::Acquire) {
                    self.discard_queue();
                    break;
                }
                if self.done.load(Ordering::Acquire) && self.queue.is_empty() {
                    self.deliver_terminal();
                    return;
                }
                if emitted >= self.requested.load(Ordering::Acquire) {
                    break;
                }
                match self.queue.pop() {
                    Some(value) => {
                        self.downstream.on_next(value);
                        emitted += 1;
                    }
                    None => break,
                }
            }
            if emitted > 0 {
                demand::produced(&self.requested, emitted);
                self.maybe_refill(emitted);
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn maybe_refill(&self, emitted: u64) {
        let consumed = self.consumed.load(Ordering::Relaxed) + emitted;
        if consumed >= self.limit {
            self.consumed.store(consumed - self.limit, Ordering::Relaxed);
            self.request_upstream(self.limit);
        } else {
            self.consumed.store(consumed, Ordering::Relaxed);
        }
    }

    fn request_upstream(&self, n: u64) {
        let Some(upstream) = self.upstream() else {
            return;
        };
        match &self.request_context {
            Some(context) => {
                context.schedule(Box::new(move || upstream.request(n)));
            }
            None => upstream.request(n),
        }
    }

    fn add_demand(&self, n: u64) {
        demand::add_cap(&self.requested, n);
        self.try_schedule();
    }

    /// Terminal delivered from inside the drain loop only, so it can never
    /// interleave with an `on_next`.
    fn deliver_terminal(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let error = self.error.lock().expect("error lock poisoned").take();
        match error {
            Some(error) => self.downstream.on_error(error),
            None => self.downstream.on_complete(),
        }
    }

    /// Route a stage-local failure through the drain loop: record it, mark
    /// the stream done, stop the upstream.
    fn terminate_with(&self, error: StreamError) {
        self.cancel_upstream();
        {
            let mut slot = self.error.lock().expect("error lock poisoned");
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.done.store(true, Ordering::Release);
        self.try_schedule();
    }

    fn cancel_upstream(&self) {
        if self.upstream_cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(upstream) = self.upstream() {
            upstream.cancel();
        }
    }

    fn discard_queue(&self) {
        while self.queue.pop().is_some() {}
    }
}

impl<T> Subscriber<T> for DeliverOnStage<T>
where
    T: Send + Sync + 'static,
{
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        *self.upstream.lock().expect("upstream lock poisoned") = Some(subscription);
        let downstream = Arc::clone(&self.downstream);
        downstream.on_subscribe(Arc::clone(&self) as Arc<dyn Subscription>);
        self.request_upstream(self.capacity as u64);
    }

    fn on_next(&self, value: T) {
        if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            diagnostics::on_next_dropped();
            return;
        }
        if self.queue.push(value).is_err() {
            self.terminate_with(StreamError::Overflow);
            return;
        }
        self.try_schedule();
    }

    fn on_error(&self, error: StreamError) {
        // The slot must be filled before `done` becomes visible: a drain
        // that sees `done` with an empty queue delivers whatever terminal
        // the slot holds at that instant.
        {
            let mut slot = self.error.lock().expect("error lock poisoned");
            if slot.is_none() {
                *slot = Some(error.clone());
            }
        }
        if self.done.swap(true, Ordering::AcqRel) {
            diagnostics::on_error_dropped(&error);
            return;
        }
        self.try_schedule();
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            diagnostics::on_complete_dropped();
            return;
        }
        self.try_schedule();
    }
}

impl<T> Subscription for DeliverOnStage<T>
where
    T: Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if demand::validate(n).is_err() {
            diagnostics::on_bad_request(n);
            self.terminate_with(StreamError::BadRequest(n));
            return;
        }
        match (&self.request_context, self.this.upgrade()) {
            (Some(context), Some(this)) => {
                context.schedule(Box::new(move || this.add_demand(n)));
            }
            _ => self.add_demand(n),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_upstream();
        // Wake a drain so already-queued elements are discarded promptly.
        self.try_schedule();
    }
}

impl<T> Scan for DeliverOnStage<T>
where
    T: Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Buffered => Some(AttrValue::Int(self.queue.len())),
            Attr::Capacity | Attr::Prefetch => Some(AttrValue::Int(self.capacity)),
            Attr::RequestedFromDownstream => {
                Some(AttrValue::Long(self.requested.load(Ordering::Acquire)))
            }
            Attr::Cancelled => Some(AttrValue::Bool(self.cancelled.load(Ordering::Acquire))),
            Attr::Terminated => Some(AttrValue::Bool(self.done.load(Ordering::Acquire))),
            Attr::Error => self
                .error
                .lock()
                .expect("error lock poisoned")
                .clone()
                .map(AttrValue::Err),
            Attr::Parent => self
                .upstream()
                .map(|upstream| AttrValue::Stage(StageRef::new(upstream))),
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            _ => None,
        }
    }
}
