//! Element transformation operator.

use std::sync::{Arc, Mutex};

use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{Publisher, Subscriber, Subscription};

use super::Source;

pub struct MapSource<T, U> {
    upstream: Arc<dyn Source<T>>,
    transform: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T, U> MapSource<T, U> {
    pub fn new(upstream: Arc<dyn Source<T>>, transform: Arc<dyn Fn(T) -> U + Send + Sync>) -> Self {
        Self { upstream, transform }
    }
}

impl<T, U> Scan for MapSource<T, U>
where
    T: Send + Sync,
    U: Send + Sync,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => Some(AttrValue::Stage(StageRef::new(self.upstream.clone()))),
            _ => None,
        }
    }
}

impl<T, U> Publisher<U> for MapSource<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        let stage = Arc::new(MapStage {
            downstream: subscriber,
            transform: Arc::clone(&self.transform),
            upstream: Mutex::new(None),
        });
        self.upstream.subscribe(stage);
    }
}

struct MapStage<T, U> {
    downstream: Arc<dyn Subscriber<U>>,
    transform: Arc<dyn Fn(T) -> U + Send + Sync>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl<T, U> MapStage<T, U> {
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().expect("upstream lock poisoned").clone()
    }
}

impl<T, U> Subscriber<T> for MapStage<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        *self.upstream.lock().expect("upstream lock poisoned") = Some(subscription);
        let downstream = Arc::clone(&self.downstream);
        downstream.on_subscribe(self);
    }

    fn on_next(&self, value: T) {
        self.downstream.on_next((self.transform)(value));
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

impl<T, U> Subscription for MapStage<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
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

impl<T, U> Scan for MapStage<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
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
