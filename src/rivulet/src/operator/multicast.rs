//! Shared-subscription multicast.
//!
//! A connectable flow splits "attach a subscriber" from "start consuming
//! upstream": any number of subscribers register edges first, then a single
//! `connect` call opens one upstream subscription whose elements fan out to
//! every edge. Delivery is paced by the slowest edge (minimum outstanding
//! demand across live edges), so no subscriber is ever pushed past what it
//! requested.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_queue::ArrayQueue;
use exec::Disposable;

use crate::demand;
use crate::diagnostics;
use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{EmptySubscription, Publisher, Subscriber, Subscription};

use super::Source;

/// Upstream connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    /// No upstream subscription. Initial state, also reached by disconnect.
    Disconnected,
    /// `connect` won the race and is subscribing upstream.
    Connecting,
    Connected,
    /// Upstream reached a terminal signal. Permanent.
    Terminated,
}

pub struct ConnectableFlow<T> {
    core: Arc<MulticastCore<T>>,
}

impl<T> ConnectableFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(upstream: Arc<dyn Source<T>>) -> Self {
        Self::with_capacity(upstream, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(upstream: Arc<dyn Source<T>>, capacity: usize) -> Self {
        assert!(capacity > 0, "multicast queue capacity must be positive");
        let core = Arc::new_cyclic(|this: &Weak<MulticastCore<T>>| MulticastCore {
            this: this.clone(),
            upstream,
            state: Mutex::new(ConnectionState::Disconnected),
            upstream_sub: Mutex::new(None),
            edges: Mutex::new(Vec::new()),
            queue: ArrayQueue::new(capacity),
            capacity,
            limit: (capacity - (capacity >> 2)) as u64,
            consumed: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
        });
        Self { core }
    }

    /// Open the shared upstream subscription. Subsequent calls while
    /// connected (or after termination) are no-ops returning a handle to
    /// the same connection.
    pub fn connect(&self) -> ConnectionHandle<T> {
        let handle = self.connection_handle();
        self.core.connect();
        handle
    }

    /// A handle for the connection lifecycle, without opening it. The
    /// upstream may run to completion synchronously inside `connect`, so a
    /// caller that tracks the live connection needs the handle in place
    /// before the upstream is attached.
    pub(crate) fn connection_handle(&self) -> ConnectionHandle<T> {
        ConnectionHandle {
            core: Arc::clone(&self.core),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.edges.lock().expect("edges lock poisoned").len()
    }

    pub(crate) fn core_stage(&self) -> StageRef {
        StageRef::new(Arc::clone(&self.core) as Arc<dyn Scan>)
    }
}

impl<T> Publisher<T> for ConnectableFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.core.add_subscriber(subscriber);
    }
}

impl<T> Scan for ConnectableFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        self.core.scan_unsafe(key)
    }

    fn inners(&self) -> Vec<StageRef> {
        self.core.inners()
    }
}

/// Disconnects the shared upstream subscription when disposed. Already
/// registered edges stay attached and resume from the next element after a
/// reconnect.
pub struct ConnectionHandle<T> {
    core: Arc<MulticastCore<T>>,
}

impl<T> Disposable for ConnectionHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        self.core.disconnect();
    }

    fn is_disposed(&self) -> bool {
        let state = *self.core.state.lock().expect("state lock poisoned");
        state == ConnectionState::Disconnected || state == ConnectionState::Terminated
    }
}

struct MulticastCore<T> {
    this: Weak<Self>,
    upstream: Arc<dyn Source<T>>,
    state: Mutex<ConnectionState>,
    upstream_sub: Mutex<Option<Arc<dyn Subscription>>>,
    edges: Mutex<Vec<Arc<MulticastEdge<T>>>>,
    queue: ArrayQueue<T>,
    capacity: usize,
    limit: u64,
    consumed: AtomicU64,
    wip: AtomicUsize,
    done: AtomicBool,
    error: Mutex<Option<StreamError>>,
}

impl<T> MulticastCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn upstream_sub(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream_sub
            .lock()
            .expect("upstream lock poisoned")
            .clone()
    }

    fn add_subscriber(&self, subscriber: Arc<dyn Subscriber<T>>) {
        {
            let state = self.state.lock().expect("state lock poisoned");
            if *state == ConnectionState::Terminated {
                drop(state);
                let error = self.error.lock().expect("error lock poisoned").clone();
                subscriber
                    .clone()
                    .on_subscribe(Arc::new(EmptySubscription));
                match error {
                    Some(error) => subscriber.on_error(error),
                    None => subscriber.on_complete(),
                }
                return;
            }
            let edge = Arc::new(MulticastEdge {
                core: self.this.clone(),
                downstream: Arc::clone(&subscriber),
                requested: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
            });
            self.edges.lock().expect("edges lock poisoned").push(Arc::clone(&edge));
            drop(state);
            subscriber.on_subscribe(edge);
        }
        self.drain();
    }

    fn connect(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Connecting;
        }
        tracing::debug!(capacity = self.capacity, "opening shared upstream subscription");
        if let Some(this) = self.this.upgrade() {
            self.upstream.subscribe(this);
        }
    }

    fn disconnect(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    *state = ConnectionState::Disconnected;
                }
                ConnectionState::Disconnected | ConnectionState::Terminated => return,
            }
        }
        tracing::debug!("closing shared upstream subscription");
        if let Some(subscription) = self
            .upstream_sub
            .lock()
            .expect("upstream lock poisoned")
            .take()
        {
            subscription.cancel();
        }
        // Reset buffered state so a later connect starts clean.
        while self.queue.pop().is_some() {}
        self.consumed.store(0, Ordering::Relaxed);
        self.done.store(false, Ordering::Release);
        *self.error.lock().expect("error lock poisoned") = None;
    }

    fn live_edges(&self) -> Vec<Arc<MulticastEdge<T>>> {
        let mut edges = self.edges.lock().expect("edges lock poisoned");
        edges.retain(|edge| !edge.cancelled.load(Ordering::Acquire));
        edges.clone()
    }

    fn remove_edge(&self, target: &MulticastEdge<T>) {
        self.edges
            .lock()
            .expect("edges lock poisoned")
            .retain(|edge| !std::ptr::eq(Arc::as_ptr(edge), target));
    }

    /// Single-flight fan-out loop, run inline on whichever thread marked
    /// work first.
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            loop {
                let done = self.done.load(Ordering::Acquire);
                if done && self.queue.is_empty() {
                    self.terminate();
                    return;
                }
                let edges = self.live_edges();
                if edges.is_empty() {
                    break;
                }
                let min_demand = edges
                    .iter()
                    .map(|edge| edge.requested.load(Ordering::Acquire))
                    .min()
                    .unwrap_or(0);
                if min_demand == 0 {
                    break;
                }
                match self.queue.pop() {
                    Some(value) => {
                        for edge in &edges {
                            edge.downstream.on_next(value.clone());
                            demand::produced(&edge.requested, 1);
                        }
                        self.after_consumed(1);
                    }
                    None => break,
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn after_consumed(&self, count: u64) {
        let consumed = self.consumed.load(Ordering::Relaxed) + count;
        if consumed >= self.limit {
            self.consumed.store(consumed - self.limit, Ordering::Relaxed);
            if let Some(subscription) = self.upstream_sub() {
                subscription.request(self.limit);
            }
        } else {
            self.consumed.store(consumed, Ordering::Relaxed);
        }
    }

    /// Fan the recorded terminal out to every edge and seal the core.
    fn terminate(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == ConnectionState::Terminated {
                return;
            }
            *state = ConnectionState::Terminated;
        }
        let edges = std::mem::take(&mut *self.edges.lock().expect("edges lock poisoned"));
        let error = self.error.lock().expect("error lock poisoned").clone();
        for edge in edges {
            if edge.cancelled.load(Ordering::Acquire) {
                continue;
            }
            match &error {
                Some(error) => edge.downstream.on_error(error.clone()),
                None => edge.downstream.on_complete(),
            }
        }
    }

    fn terminate_with(&self, error: StreamError) {
        if let Some(subscription) = self
            .upstream_sub
            .lock()
            .expect("upstream lock poisoned")
            .take()
        {
            subscription.cancel();
        }
        {
            let mut slot = self.error.lock().expect("error lock poisoned");
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.done.store(true, Ordering::Release);
        self.drain();
    }
}

impl<T> Subscriber<T> for MulticastCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != ConnectionState::Connecting {
                // Disconnected while the upstream handshake was in flight.
                drop(state);
                subscription.cancel();
                return;
            }
            *state = ConnectionState::Connected;
        }
        *self.upstream_sub.lock().expect("upstream lock poisoned") = Some(Arc::clone(&subscription));
        subscription.request(self.capacity as u64);
    }

    fn on_next(&self, value: T) {
        if self.done.load(Ordering::Acquire) {
            diagnostics::on_next_dropped();
            return;
        }
        if self.queue.push(value).is_err() {
            self.terminate_with(StreamError::Overflow);
            return;
        }
        self.drain();
    }

    fn on_error(&self, error: StreamError) {
        // Slot before `done`: a drain observing `done` with an empty queue
        // delivers whatever terminal the slot holds at that instant.
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
        self.drain();
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            diagnostics::on_complete_dropped();
            return;
        }
        self.drain();
    }
}

impl<T> Scan for MulticastCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Buffered => Some(AttrValue::Int(self.queue.len())),
            Attr::Capacity | Attr::Prefetch => Some(AttrValue::Int(self.capacity)),
            Attr::Terminated => {
                let state = *self.state.lock().expect("state lock poisoned");
                Some(AttrValue::Bool(state == ConnectionState::Terminated))
            }
            Attr::Error => self
                .error
                .lock()
                .expect("error lock poisoned")
                .clone()
                .map(AttrValue::Err),
            Attr::Parent => Some(AttrValue::Stage(StageRef::new(self.upstream.clone()))),
            _ => None,
        }
    }

    fn inners(&self) -> Vec<StageRef> {
        self.edges
            .lock()
            .expect("edges lock poisoned")
            .iter()
            .map(|edge| StageRef::new(Arc::clone(edge) as Arc<dyn Scan>))
            .collect()
    }
}

/// Per-subscriber leg of the fan-out. Tracks that subscriber's own demand
/// and cancellation without touching its siblings.
struct MulticastEdge<T> {
    core: Weak<MulticastCore<T>>,
    downstream: Arc<dyn Subscriber<T>>,
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl<T> Subscription for MulticastEdge<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if demand::validate(n).is_err() {
            diagnostics::on_bad_request(n);
            self.cancel();
            self.downstream.on_error(StreamError::BadRequest(n));
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        demand::add_cap(&self.requested, n);
        if let Some(core) = self.core.upgrade() {
            core.drain();
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            core.remove_edge(self);
            // The slowest edge may just have left; let the rest progress.
            core.drain();
        }
    }
}

impl<T> Scan for MulticastEdge<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::RequestedFromDownstream => {
                Some(AttrValue::Long(self.requested.load(Ordering::Acquire)))
            }
            Attr::Cancelled => Some(AttrValue::Bool(self.cancelled.load(Ordering::Acquire))),
            Attr::Parent => self
                .core
                .upgrade()
                .map(|core| AttrValue::Stage(StageRef::new(core as Arc<dyn Scan>))),
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            _ => None,
        }
    }
}
