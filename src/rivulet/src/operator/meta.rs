//! Metadata operators: naming, tagging, and the scan-chain boundary.
//!
//! These attach introspection metadata without altering data flow. A stage
//! with neither name nor tags is the `hide` boundary: a plain identity link
//! in the scan chain.

use std::sync::{Arc, Mutex};

use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{Publisher, Subscriber, Subscription};

use super::Source;

pub struct MetaSource<T> {
    upstream: Arc<dyn Source<T>>,
    name: Option<String>,
    tags: Vec<String>,
}

impl<T> MetaSource<T> {
    pub fn named(upstream: Arc<dyn Source<T>>, name: impl Into<String>) -> Self {
        Self {
            upstream,
            name: Some(name.into()),
            tags: Vec::new(),
        }
    }

    pub fn tagged(upstream: Arc<dyn Source<T>>, tags: Vec<String>) -> Self {
        Self {
            upstream,
            name: None,
            tags,
        }
    }

    pub fn hidden(upstream: Arc<dyn Source<T>>) -> Self {
        Self {
            upstream,
            name: None,
            tags: Vec::new(),
        }
    }

    fn answer_meta(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Name => self.name.clone().map(AttrValue::Str),
            Attr::Tags if !self.tags.is_empty() => Some(AttrValue::Tags(self.tags.clone())),
            _ => None,
        }
    }
}

impl<T> Scan for MetaSource<T>
where
    T: Send + Sync,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => Some(AttrValue::Stage(StageRef::new(self.upstream.clone()))),
            _ => self.answer_meta(key),
        }
    }
}

impl<T> Publisher<T> for MetaSource<T>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let stage = Arc::new(MetaStage {
            downstream: subscriber,
            name: self.name.clone(),
            tags: self.tags.clone(),
            upstream: Mutex::new(None),
        });
        self.upstream.subscribe(stage);
    }
}

struct MetaStage<T> {
    downstream: Arc<dyn Subscriber<T>>,
    name: Option<String>,
    tags: Vec<String>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl<T> MetaStage<T> {
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().expect("upstream lock poisoned").clone()
    }
}

impl<T> Subscriber<T> for MetaStage<T>
where
    T: Send + Sync + 'static,
{
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        *self.upstream.lock().expect("upstream lock poisoned") = Some(subscription);
        let downstream = Arc::clone(&self.downstream);
        downstream.on_subscribe(self);
    }

    fn on_next(&self, value: T) {
        self.downstream.on_next(value);
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

impl<T> Subscription for MetaStage<T>
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

impl<T> Scan for MetaStage<T>
where
    T: Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => self
                .upstream()
                .map(|upstream| AttrValue::Stage(StageRef::new(upstream))),
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            Attr::Name => self.name.clone().map(AttrValue::Str),
            Attr::Tags if !self.tags.is_empty() => Some(AttrValue::Tags(self.tags.clone())),
            _ => None,
        }
    }
}
