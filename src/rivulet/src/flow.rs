//! Fluent assembly surface.
//!
//! A [`Flow`] is an immutable handle on an attachable source. Every
//! combinator wraps the current source in a new operator source and returns
//! a new `Flow`; nothing runs until a subscriber attaches. The handle is
//! cheap to clone and each subscription gets its own chain of live stages.

use std::sync::Arc;

use exec::ExecutionContext;

use crate::error::StreamError;
use crate::operator::deliver_on::{DeliverOnSource, HopConfig};
use crate::operator::filter::FilterSource;
use crate::operator::iter_source::IterSource;
use crate::operator::lambda::{LambdaSubscriber, SubscriberHandle};
use crate::operator::map::MapSource;
use crate::operator::meta::MetaSource;
use crate::operator::multicast::ConnectableFlow;
use crate::operator::push::{PushHandle, PushSource};
use crate::operator::ref_count::RefCountFlow;
use crate::operator::Source;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::Subscriber;

pub struct Flow<T> {
    source: Arc<dyn Source<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> Flow<T>
where
    T: Send + Sync + 'static,
{
    pub fn from_source(source: Arc<dyn Source<T>>) -> Self {
        Self { source }
    }

    /// Cold source over a cloneable iterable: each subscriber replays the
    /// elements from the start, paced by its own demand.
    pub fn from_iter<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_source(Arc::new(IterSource::new(iterable)))
    }

    /// Hot source driven by the returned handle.
    pub fn from_push() -> (Self, PushHandle<T>)
    where
        T: Clone,
    {
        let (source, handle) = PushSource::new();
        (Self::from_source(Arc::new(source)), handle)
    }

    pub fn map<U, F>(self, transform: F) -> Flow<U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Flow::from_source(Arc::new(MapSource::new(self.source, Arc::new(transform))))
    }

    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_source(Arc::new(FilterSource::new(self.source, Arc::new(predicate))))
    }

    /// Attach a name visible to scans of this stage and everything
    /// assembled downstream of it.
    pub fn named_as(self, name: impl Into<String>) -> Self {
        Self::from_source(Arc::new(MetaSource::named(self.source, name)))
    }

    pub fn tagged<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        Self::from_source(Arc::new(MetaSource::tagged(self.source, tags)))
    }

    /// Insert a bare identity stage. Useful to keep a later name or tag
    /// from being folded into this part of the chain.
    pub fn hide(self) -> Self {
        Self::from_source(Arc::new(MetaSource::hidden(self.source)))
    }

    /// Hop delivery onto `context` with the default handoff capacity.
    pub fn deliver_on(self, context: Arc<dyn ExecutionContext>) -> Self {
        self.deliver_on_with(HopConfig::new(context))
    }

    pub fn deliver_on_with(self, config: HopConfig) -> Self {
        Self::from_source(Arc::new(DeliverOnSource::new(self.source, config)))
    }

    /// Share one upstream subscription between many subscribers; the
    /// upstream is attached only when [`ConnectableFlow::connect`] runs.
    pub fn multicast(self) -> ConnectableFlow<T>
    where
        T: Clone,
    {
        ConnectableFlow::new(self.source)
    }

    pub fn multicast_with_capacity(self, capacity: usize) -> ConnectableFlow<T>
    where
        T: Clone,
    {
        ConnectableFlow::with_capacity(self.source, capacity)
    }

    pub fn subscribe_raw(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.source.subscribe(subscriber);
    }

    /// Attach a consumer callback with unbounded demand. Errors are logged,
    /// completion is silent.
    pub fn subscribe<F>(&self, next: F) -> SubscriberHandle<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with(
            next,
            |error: StreamError| tracing::error!(%error, "unhandled stream error"),
            || {},
        )
    }

    pub fn subscribe_with<N, E, C>(&self, next: N, error: E, complete: C) -> SubscriberHandle<T>
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(StreamError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        let stage = Arc::new(LambdaSubscriber::new(
            Box::new(next),
            Box::new(error),
            Box::new(complete),
        ));
        self.source.subscribe(Arc::clone(&stage) as Arc<dyn Subscriber<T>>);
        SubscriberHandle::new(stage)
    }

    /// The underlying attachable source, for building custom operators on
    /// top of an assembled chain.
    pub fn into_source(self) -> Arc<dyn Source<T>> {
        self.source
    }

    /// The assembly chain as a walkable scan entry point.
    pub fn stage(&self) -> StageRef {
        StageRef::new(Arc::clone(&self.source) as Arc<dyn Scan>)
    }
}

impl Flow<i64> {
    /// `count` consecutive integers starting at `start`.
    pub fn range(start: i64, count: i64) -> Self {
        let end = start.saturating_add(count.max(0));
        Self::from_iter(start..end)
    }
}

impl<T> Scan for Flow<T>
where
    T: Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        self.source.scan_unsafe(key)
    }

    fn is_scan_available(&self) -> bool {
        self.source.is_scan_available()
    }

    fn inners(&self) -> Vec<StageRef> {
        self.source.inners()
    }
}

impl<T> ConnectableFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Connect automatically once `threshold` subscribers have attached,
    /// disconnect when the count drops back to zero, and re-arm for the
    /// next wave of subscribers.
    pub fn ref_count(self, threshold: usize) -> Flow<T> {
        self.ref_count_with(threshold, true)
    }

    /// Like [`ConnectableFlow::ref_count`], but `reconnectable: false`
    /// permanently seals the flow after the first disconnect.
    pub fn ref_count_with(self, threshold: usize, reconnectable: bool) -> Flow<T> {
        Flow::from_source(Arc::new(RefCountFlow::new(self, threshold, reconnectable)))
    }
}
