//! Programmatic hot source.
//!
//! A push source emits whatever the producer hands it, whenever the
//! producer calls. Subscribers that have outstanding demand receive the
//! element; subscribers without demand have it dropped on their behalf
//! (recorded in the drop diagnostics) rather than buffered, because a hot
//! producer does not wait.
//!
//! The handle is meant to be driven from one producer thread at a time;
//! delivery happens inline on that thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::demand;
use crate::diagnostics;
use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{EmptySubscription, Publisher, Subscriber, Subscription};

pub struct PushSource<T> {
    shared: Arc<PushShared<T>>,
}

impl<T> PushSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> (Self, PushHandle<T>) {
        let shared = Arc::new(PushShared {
            edges: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
        });
        let handle = PushHandle {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, handle)
    }
}

impl<T> Publisher<T> for PushSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.shared.add_subscriber(subscriber);
    }
}

impl<T> Scan for PushSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Terminated => Some(AttrValue::Bool(self.shared.done.load(Ordering::Acquire))),
            Attr::Error => self
                .shared
                .error
                .lock()
                .expect("error lock poisoned")
                .clone()
                .map(AttrValue::Err),
            _ => None,
        }
    }

    fn inners(&self) -> Vec<StageRef> {
        self.shared
            .edges
            .lock()
            .expect("edges lock poisoned")
            .iter()
            .map(|edge| StageRef::new(Arc::clone(edge) as Arc<dyn Scan>))
            .collect()
    }
}

/// Producer-side lever for a [`PushSource`].
pub struct PushHandle<T> {
    shared: Arc<PushShared<T>>,
}

impl<T> PushHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Emit one element to every subscriber with outstanding demand.
    pub fn next(&self, value: T) {
        if self.shared.done.load(Ordering::Acquire) {
            diagnostics::on_next_dropped();
            return;
        }
        for edge in self.shared.live_edges() {
            if edge.requested.load(Ordering::Acquire) > 0 {
                edge.downstream.on_next(value.clone());
                demand::produced(&edge.requested, 1);
            } else {
                diagnostics::on_next_dropped();
            }
        }
    }

    pub fn complete(&self) {
        if self.shared.done.swap(true, Ordering::AcqRel) {
            diagnostics::on_complete_dropped();
            return;
        }
        for edge in self.shared.take_edges() {
            edge.downstream.on_complete();
        }
    }

    pub fn error(&self, error: StreamError) {
        if self.shared.done.swap(true, Ordering::AcqRel) {
            diagnostics::on_error_dropped(&error);
            return;
        }
        *self.shared.error.lock().expect("error lock poisoned") = Some(error.clone());
        for edge in self.shared.take_edges() {
            edge.downstream.on_error(error.clone());
        }
    }
}

struct PushShared<T> {
    edges: Mutex<Vec<Arc<PushEdge<T>>>>,
    done: AtomicBool,
    error: Mutex<Option<StreamError>>,
}

impl<T> PushShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn add_subscriber(self: &Arc<Self>, subscriber: Arc<dyn Subscriber<T>>) {
        if self.done.load(Ordering::Acquire) {
            let error = self.error.lock().expect("error lock poisoned").clone();
            Arc::clone(&subscriber).on_subscribe(Arc::new(EmptySubscription));
            match error {
                Some(error) => subscriber.on_error(error),
                None => subscriber.on_complete(),
            }
            return;
        }
        let edge = Arc::new(PushEdge {
            shared: Arc::downgrade(self),
            downstream: Arc::clone(&subscriber),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        });
        self.edges
            .lock()
            .expect("edges lock poisoned")
            .push(Arc::clone(&edge));
        subscriber.on_subscribe(edge);
    }

    fn live_edges(&self) -> Vec<Arc<PushEdge<T>>> {
        let mut edges = self.edges.lock().expect("edges lock poisoned");
        edges.retain(|edge| !edge.cancelled.load(Ordering::Acquire));
        edges.clone()
    }

    fn take_edges(&self) -> Vec<Arc<PushEdge<T>>> {
        let mut edges = std::mem::take(&mut *self.edges.lock().expect("edges lock poisoned"));
        edges.retain(|edge| !edge.cancelled.load(Ordering::Acquire));
        edges
    }

    fn remove_edge(&self, target: &PushEdge<T>) {
        self.edges
            .lock()
            .expect("edges lock poisoned")
            .retain(|edge| !std::ptr::eq(Arc::as_ptr(edge), target));
    }
}

struct PushEdge<T> {
    shared: std::sync::Weak<PushShared<T>>,
    downstream: Arc<dyn Subscriber<T>>,
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl<T> Subscription for PushEdge<T>
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
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_edge(self);
        }
    }
}

impl<T> Scan for PushEdge<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::RequestedFromDownstream => {
                Some(AttrValue::Long(self.requested.load(Ordering::Acquire)))
            }
            Attr::Cancelled => Some(AttrValue::Bool(self.cancelled.load(Ordering::Acquire))),
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            _ => None,
        }
    }
}
