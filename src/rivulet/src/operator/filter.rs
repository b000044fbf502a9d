//! Predicate filter operator.
//!
//! A discarded element consumed one unit of upstream demand without
//! producing anything downstream, so the stage immediately requests one
//! replacement to keep the demand ledger honest.

use std::sync::{Arc, Mutex};

use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{Publisher, Subscriber, Subscription};

use super::Source;

pub struct FilterSource<T> {
    upstream: Arc<dyn Source<T>>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> FilterSource<T> {
    pub fn new(
        upstream: Arc<dyn Source<T>>,
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    ) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

impl<T> Scan for FilterSource<T>
where
    T: Send + Sync,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => Some(AttrValue::Stage(StageRef::new(self.upstream.clone()))),
            _ => None,
        }
    }
}

impl<T> Publisher<T> for FilterSource<T>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let stage = Arc::new(FilterStage {
            downstream: subscriber,
            predicate: Arc::clone(&self.predicate),
            upstream: Mutex::new(None),
        });
        self.upstream.subscribe(stage);
    }
}

struct FilterStage<T> {
    downstream: Arc<dyn Subscriber<T>>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl<T> FilterStage<T> {
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().expect("upstream lock poisoned").clone()
    }
}

impl<T> Subscriber<T> for FilterStage<T>
where
    T: Send + Sync + 'static,
{
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        *self.upstream.lock().expect("upstream lock poisoned") = Some(subscription);
        let downstream = Arc::clone(&self.downstream);
        downstream.on_subscribe(self);
    }

    fn on_next(&self, value: T) {
        if (self.predicate)(&value) {
            self.downstream.on_next(value);
        } else if let Some(upstream) = self.upstream() {
            upstream.request(1);
        }
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

impl<T> Subscription for FilterStage<T>
where
    T: Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if let Some(upstream) = self.upstream() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        if let Some(upstream) = self.upstream() {
            upstream.cancel();
        }
    }
}

impl<T> Scan for FilterStage<T>
where
    T: Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => self
                .upstream()
                .map(|upstream| AttrValue::Stage(StageRef::new(upstream))),
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            _ => None,
        }
    }
}
