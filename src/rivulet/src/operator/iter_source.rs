//! Demand-driven source over a cloneable iterable.
//!
//! Cold source: every subscriber gets its own iteration from the start.
//! Elements are only pulled against outstanding demand; a consumer that
//! stops requesting simply leaves the iterator parked.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::demand;
use crate::diagnostics;
use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{Publisher, Subscriber, Subscription};

pub struct IterSource<I> {
    iterable: I,
}

impl<I> IterSource<I> {
    pub fn new(iterable: I) -> Self {
        Self { iterable }
    }
}

impl<I> Scan for IterSource<I> where I: Send + Sync {}

impl<I, T> Publisher<T> for IterSource<I>
where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    T: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let stage = Arc::new(IterStage {
            iter: Mutex::new(self.iterable.clone().into_iter()),
            downstream: subscriber,
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        let downstream = Arc::clone(&stage.downstream);
        downstream.on_subscribe(stage);
    }
}

struct IterStage<It, T> {
    iter: Mutex<It>,
    downstream: Arc<dyn Subscriber<T>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    done: AtomicBool,
}

impl<It, T> IterStage<It, T>
where
    It: Iterator<Item = T> + Send,
    T: Send + Sync + 'static,
{
    /// Single-flight slow path: whoever wins the wip counter delivers until
    /// demand or the iterator runs out, then re-checks for missed signals.
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            let mut emitted: u64 = 0;
            loop {
                if self.cancelled.load(Ordering::Acquire) {
                    break;
                }
                if emitted == self.requested.load(Ordering::Acquire) {
                    break;
                }
                let next = self.iter.lock().expect("iterator lock poisoned").next();
                match next {
                    Some(value) => {
                        self.downstream.on_next(value);
                        emitted += 1;
                    }
                    None => {
                        if !self.done.swap(true, Ordering::AcqRel)
                            && !self.cancelled.load(Ordering::Acquire)
                        {
                            self.downstream.on_complete();
                        }
                        return;
                    }
                }
            }
            if emitted > 0 {
                demand::produced(&self.requested, emitted);
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }
}

impl<It, T> Subscription for IterStage<It, T>
where
    It: Iterator<Item = T> + Send,
    T: Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if demand::validate(n).is_err() {
            diagnostics::on_bad_request(n);
            self.cancel();
            self.downstream.on_error(StreamError::BadRequest(n));
            return;
        }
        demand::add_cap(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl<It, T> Scan for IterStage<It, T>
where
    It: Send,
    T: Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            Attr::RequestedFromDownstream => {
                Some(AttrValue::Long(self.requested.load(Ordering::Acquire)))
            }
            Attr::Cancelled => Some(AttrValue::Bool(self.cancelled.load(Ordering::Acquire))),
            Attr::Terminated => Some(AttrValue::Bool(self.done.load(Ordering::Acquire))),
            _ => None,
        }
    }
}
