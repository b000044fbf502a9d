//! Reference-counted automatic connection management.
//!
//! Wraps a connectable flow so the shared upstream subscription is opened
//! when the number of attached subscribers first reaches a threshold and
//! torn down when it falls back to zero. By default the flow re-arms after
//! a teardown, so a fresh wave of subscribers opens a fresh upstream
//! subscription; a non-reconnectable flow instead refuses all subscribers
//! arriving after the teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use exec::Disposable;

use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{EmptySubscription, Publisher, Subscriber, Subscription};

use super::multicast::{ConnectableFlow, ConnectionHandle};

pub struct RefCountFlow<T> {
    shared: Arc<RefCountShared<T>>,
}

impl<T> RefCountFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(connectable: ConnectableFlow<T>, threshold: usize, reconnectable: bool) -> Self {
        assert!(threshold > 0, "connection threshold must be positive");
        Self {
            shared: Arc::new(RefCountShared {
                connectable,
                threshold,
                reconnectable,
                count: Mutex::new(0),
                connection: Mutex::new(None),
                sealed: AtomicBool::new(false),
            }),
        }
    }
}

impl<T> Publisher<T> for RefCountFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        if self.shared.sealed.load(Ordering::Acquire) {
            Arc::clone(&subscriber).on_subscribe(Arc::new(EmptySubscription));
            subscriber.on_error(StreamError::source("shared connection already closed"));
            return;
        }
        let should_connect = {
            let mut count = self
                .shared
                .count
                .lock()
                .expect("subscriber count lock poisoned");
            *count += 1;
            *count >= self.shared.threshold
        };
        let stage = Arc::new(RefCountStage {
            shared: Arc::clone(&self.shared),
            downstream: subscriber,
            upstream: Mutex::new(None),
            released: AtomicBool::new(false),
        });
        self.shared.connectable.subscribe(stage);
        if should_connect {
            tracing::debug!(threshold = self.shared.threshold, "subscriber threshold reached");
            {
                let mut connection = self
                    .shared
                    .connection
                    .lock()
                    .expect("connection lock poisoned");
                if connection.is_none() {
                    *connection = Some(self.shared.connectable.connection_handle());
                }
            }
            // The upstream may run to completion synchronously inside
            // connect(), releasing every subscriber on the way; release_one
            // must find the handle already stored or the shared upstream
            // would never be torn down. connect() itself is idempotent
            // while the connection is live.
            self.shared.connectable.connect();
        }
    }
}

impl<T> Scan for RefCountFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => Some(AttrValue::Stage(self.shared.connectable.core_stage())),
            _ => None,
        }
    }
}

struct RefCountShared<T> {
    connectable: ConnectableFlow<T>,
    threshold: usize,
    reconnectable: bool,
    count: Mutex<usize>,
    connection: Mutex<Option<ConnectionHandle<T>>>,
    sealed: AtomicBool,
}

impl<T> RefCountShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// One subscriber left (cancel or terminal). Tears the shared
    /// connection down when the last one is gone.
    fn release_one(&self) {
        let disconnect = {
            let mut count = self.count.lock().expect("subscriber count lock poisoned");
            *count = count.saturating_sub(1);
            *count == 0
        };
        if !disconnect {
            return;
        }
        let handle = self
            .connection
            .lock()
            .expect("connection lock poisoned")
            .take();
        // A below-threshold attach/detach never connected; only an actual
        // teardown seals a non-reconnectable flow.
        if let Some(handle) = handle {
            if !self.reconnectable {
                self.sealed.store(true, Ordering::Release);
            }
            tracing::debug!("last subscriber left, disconnecting shared upstream");
            handle.dispose();
        }
    }
}

/// Per-subscriber accounting shim between the downstream and the
/// multicast edge it actually subscribes to.
struct RefCountStage<T> {
    shared: Arc<RefCountShared<T>>,
    downstream: Arc<dyn Subscriber<T>>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    released: AtomicBool,
}

impl<T> RefCountStage<T> {
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().expect("upstream lock poisoned").clone()
    }
}

impl<T> RefCountStage<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.release_one();
    }
}

impl<T> Subscriber<T> for RefCountStage<T>
where
    T: Clone + Send + Sync + 'static,
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
        self.release();
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
        self.release();
    }
}

impl<T> Subscription for RefCountStage<T>
where
    T: Clone + Send + Sync + 'static,
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
        self.release();
    }
}

impl<T> Scan for RefCountStage<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => self
                .upstream()
                .map(|upstream| AttrValue::Stage(StageRef::new(upstream))),
            Attr::Actual => Some(AttrValue::Stage(StageRef::new(self.downstream.clone()))),
            Attr::Cancelled => Some(AttrValue::Bool(self.released.load(Ordering::Acquire))),
            _ => None,
        }
    }
}
